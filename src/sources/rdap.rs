//! RDAP fallback: look up one representative address of the block

use async_trait::async_trait;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use super::dns::CymruDnsClient;
use super::{fetch_json, json_scalar, strip_as_prefix, AttributionSource, LookupTarget, SourceError};
use crate::attribution::{AttributionRecord, Source};
use crate::rate_limit::RateLimiter;

/// Network object fields used from an RDAP `ip` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RdapNetwork {
    pub name: Option<String>,
    pub country: Option<String>,
    pub origin_asn: Option<String>,
}

/// Parse an RDAP ip-network response. Returns `None` for anything that is not a
/// network object.
pub fn parse_rdap_network(body: &Value) -> Option<RdapNetwork> {
    if body.get("objectClassName").and_then(Value::as_str) != Some("ip network") && body.get("handle").is_none() {
        return None;
    }
    Some(RdapNetwork {
        name: body["name"].as_str().map(str::to_string),
        country: body["country"].as_str().map(str::to_string),
        origin_asn: body["arin_originas0_originautnums"]
            .get(0)
            .and_then(json_scalar)
            .map(|asn| strip_as_prefix(&asn)),
    })
}

pub struct RdapClient {
    base_url: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    /// Resolves the origin ASN when the registry does not report one
    origin: Option<Arc<CymruDnsClient>>,
}

impl RdapClient {
    pub fn new(
        base_url: impl Into<String>,
        client: reqwest::Client,
        limiter: Arc<RateLimiter>,
        origin: Option<Arc<CymruDnsClient>>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            limiter,
            origin,
        }
    }

    pub async fn lookup_address(&self, ip: Ipv4Addr) -> Result<Option<AttributionRecord>, SourceError> {
        let url = format!("{}/ip/{}", self.base_url, ip);
        let body = fetch_json(&self.client, &url).await;
        self.limiter.after_call().await;

        let Some(network) = parse_rdap_network(&body?) else {
            debug!("RDAP response for {} is not an ip network", ip);
            return Ok(None);
        };

        let mut asn = network.origin_asn.clone();
        let mut country = network.country.clone();

        if asn.is_none() {
            if let Some(dns) = &self.origin {
                match dns.origin(ip).await {
                    Ok(Some(origin)) => {
                        asn = Some(origin.asn);
                        country = country.or(origin.country);
                    }
                    Ok(None) => debug!("No origin ASN published for {}", ip),
                    Err(e) => debug!("Origin ASN lookup for {} failed: {}", ip, e),
                }
            }
        }

        Ok(Some(AttributionRecord::new(
            asn.unwrap_or_default(),
            network.name.unwrap_or_default(),
            country.as_deref(),
            Source::Rdap,
        )))
    }
}

#[async_trait]
impl AttributionSource for RdapClient {
    fn source(&self) -> Source {
        Source::Rdap
    }

    async fn lookup(&self, target: &LookupTarget) -> Result<Option<AttributionRecord>, SourceError> {
        match target.sample {
            Some(ip) => {
                debug!("Using sample address {} for {}", ip, target.block);
                self.lookup_address(ip).await
            }
            None => {
                debug!("No sample address available for {}, skipping RDAP", target.block);
                Ok(None)
            }
        }
    }
}
