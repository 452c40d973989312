//! ASN enrichment: ask each registry for a richer holder/country description

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::attribution::{is_meaningful, AttributionRecord, Source};
use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::sources::registry::{AsnDetails, RegistryClient};
use crate::sources::{build_http_client, SourceError};

/// Anything that can describe an AS number
#[async_trait]
pub trait AsnDetailsSource: Send + Sync {
    fn source(&self) -> Source;

    async fn lookup_asn(&self, asn: &str) -> Result<Option<AsnDetails>, SourceError>;
}

#[async_trait]
impl AsnDetailsSource for RegistryClient {
    fn source(&self) -> Source {
        self.kind().source()
    }

    async fn lookup_asn(&self, asn: &str) -> Result<Option<AsnDetails>, SourceError> {
        RegistryClient::lookup_asn(self, asn).await
    }
}

pub struct EnrichmentStep {
    sources: Vec<Box<dyn AsnDetailsSource>>,
}

impl EnrichmentStep {
    pub fn new(sources: Vec<Box<dyn AsnDetailsSource>>) -> Self {
        Self { sources }
    }

    /// One client per configured registry, in configuration order
    pub fn from_config(config: &AppConfig, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let http = build_http_client(&config.http)?;
        let sources = config
            .registries
            .iter()
            .map(|registry| {
                Box::new(RegistryClient::from_config(registry, http.clone(), limiter.clone()))
                    as Box<dyn AsnDetailsSource>
            })
            .collect();
        Ok(Self::new(sources))
    }

    /// First registry answer carrying a holder or country, if any
    pub async fn details(&self, asn: &str) -> Option<AsnDetails> {
        for source in &self.sources {
            match source.lookup_asn(asn).await {
                Ok(Some(details)) => {
                    debug!("{} described AS{}: {:?}", source.source(), asn, details);
                    return Some(details);
                }
                Ok(None) => debug!("{} had no description for AS{}", source.source(), asn),
                Err(e) => debug!("{} ASN lookup for AS{} failed: {}", source.source(), asn, e),
            }
        }
        None
    }

    /// Merge registry details into the cascade record. Fields are replaced only
    /// when the registry supplied a value; asn and source are kept.
    pub async fn enrich(&self, asn: &str, record: AttributionRecord) -> AttributionRecord {
        match self.details(asn).await {
            Some(details) => merge(record, details),
            None => record,
        }
    }
}

pub fn merge(mut record: AttributionRecord, details: AsnDetails) -> AttributionRecord {
    if let Some(holder) = details.holder.filter(|h| is_meaningful(Some(h.as_str()))) {
        record.holder = Some(holder);
    }
    if let Some(country) = details.country.filter(|c| is_meaningful(Some(c.as_str()))) {
        record.country = Some(country);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedDetails {
        tag: Source,
        answer: Option<AsnDetails>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AsnDetailsSource for FixedDetails {
        fn source(&self) -> Source {
            self.tag
        }

        async fn lookup_asn(&self, _asn: &str) -> Result<Option<AsnDetails>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl AsnDetailsSource for Broken {
        fn source(&self) -> Source {
            Source::Ripe
        }

        async fn lookup_asn(&self, asn: &str) -> Result<Option<AsnDetails>, SourceError> {
            Err(SourceError::Timeout(format!("AS{}", asn)))
        }
    }

    fn details(holder: Option<&str>, country: Option<&str>) -> Option<AsnDetails> {
        Some(AsnDetails {
            holder: holder.map(str::to_string),
            country: country.map(str::to_string),
        })
    }

    fn cascade_record() -> AttributionRecord {
        AttributionRecord::new("15169", "GOOGLE", Some("US"), Source::TeamCymru)
    }

    #[tokio::test]
    async fn test_enrichment_replaces_present_fields() {
        let step = EnrichmentStep::new(vec![Box::new(FixedDetails {
            tag: Source::Ripe,
            answer: details(Some("GOOGLE - Google LLC"), None),
            calls: Arc::new(AtomicUsize::new(0)),
        })]);

        let record = step.enrich("15169", cascade_record()).await;
        assert_eq!(record.holder.as_deref(), Some("GOOGLE - Google LLC"));
        assert_eq!(record.country.as_deref(), Some("US"));
        assert_eq!(record.asn.as_deref(), Some("15169"));
        assert_eq!(record.source, Source::TeamCymru);
    }

    #[tokio::test]
    async fn test_no_details_keeps_cascade_values() {
        let step = EnrichmentStep::new(vec![
            Box::new(Broken),
            Box::new(FixedDetails {
                tag: Source::Lacnic,
                answer: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        ]);

        let record = step.enrich("15169", cascade_record()).await;
        assert_eq!(record, cascade_record());
        assert!(record.is_valid());
    }

    #[tokio::test]
    async fn test_stops_at_first_registry_with_details() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let step = EnrichmentStep::new(vec![
            Box::new(Broken),
            Box::new(FixedDetails {
                tag: Source::Lacnic,
                answer: details(None, Some("BR")),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(FixedDetails {
                tag: Source::Apnic,
                answer: details(Some("OTHER"), Some("AU")),
                calls: later_calls.clone(),
            }),
        ]);

        let record = step.enrich("28573", cascade_record()).await;
        assert_eq!(record.country.as_deref(), Some("BR"));
        assert_eq!(record.holder.as_deref(), Some("GOOGLE"));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_merge_ignores_placeholder_values() {
        let merged = merge(
            cascade_record(),
            AsnDetails {
                holder: Some("na".to_string()),
                country: Some(String::new()),
            },
        );
        assert_eq!(merged, cascade_record());
    }
}
