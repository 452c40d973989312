pub mod attribution;
pub mod cascade;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod driver;
pub mod enrich;
pub mod export;
pub mod logger;
pub mod rate_limit;
pub mod repair;
pub mod sources;
pub mod subnet;

pub use attribution::{AttributionRecord, Source};
pub use checkpoint::{BatchRun, ResumeMode};
pub use subnet::NetworkBlock;
