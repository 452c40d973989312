//! The resolution cascade: ordered attempts across bulk, registry and RDAP sources
//!
//! Sources are consulted strictly in the order they were registered and the first
//! valid record wins. Source failures are logged and treated as "try the next
//! one"; they never escape [`ResolutionCascade::resolve`].

use std::sync::Arc;
use tracing::{debug, info};

use crate::attribution::AttributionRecord;
use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::sources::bulk::BulkWhoisClient;
use crate::sources::dns::CymruDnsClient;
use crate::sources::rdap::RdapClient;
use crate::sources::registry::RegistryClient;
use crate::sources::{build_http_client, AttributionSource, LookupTarget};

pub struct ResolutionCascade {
    sources: Vec<Box<dyn AttributionSource>>,
}

impl ResolutionCascade {
    /// Cascade over an explicit, ordered list of sources
    pub fn new(sources: Vec<Box<dyn AttributionSource>>) -> Self {
        Self { sources }
    }

    /// The standard order: bulk whois, each configured registry, then RDAP
    pub fn from_config(
        config: &AppConfig,
        limiter: Arc<RateLimiter>,
        dns: Arc<CymruDnsClient>,
    ) -> anyhow::Result<Self> {
        let http = build_http_client(&config.http)?;
        let mut sources: Vec<Box<dyn AttributionSource>> = Vec::new();

        sources.push(Box::new(BulkWhoisClient::from_config(&config.bulk, limiter.clone())));
        for registry in &config.registries {
            sources.push(Box::new(RegistryClient::from_config(registry, http.clone(), limiter.clone())));
        }
        sources.push(Box::new(RdapClient::new(
            config.rdap.base_url.clone(),
            http,
            limiter,
            Some(dns),
        )));

        Ok(Self::new(sources))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolve a block to the first valid record, or the canonical unresolved record
    pub async fn resolve(&self, target: &LookupTarget) -> AttributionRecord {
        for source in &self.sources {
            match source.lookup(target).await {
                Ok(Some(record)) if record.is_valid() => {
                    info!("Found valid data for {} via {}", target.block, source.source());
                    return record;
                }
                Ok(Some(record)) => {
                    debug!(
                        "{} returned placeholder data for {} (asn={:?}, holder={:?})",
                        source.source(),
                        target.block,
                        record.asn,
                        record.holder
                    );
                }
                Ok(None) => debug!("{} had no data for {}", source.source(), target.block),
                Err(e) => debug!("{} failed for {}: {}", source.source(), target.block, e),
            }
        }

        info!("No valid data found for {} from any source", target.block);
        AttributionRecord::unresolved()
    }
}
