#![allow(dead_code)]

pub mod fixtures;
pub mod whois_server;
pub mod wiremock_helpers;
