//! HTTP JSON clients for the five regional internet registries
//!
//! Every registry answers in its own schema, so each [`RegistryKind`] carries its
//! own parser. A response the parser cannot make sense of is a normal "absent"
//! outcome, never an error.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{fetch_json, json_scalar, strip_as_prefix, vcard_full_name, AttributionSource, LookupTarget, SourceError};
use crate::attribution::{is_meaningful, AttributionRecord, Source};
use crate::config::{RegistryConfig, ASN_PLACEHOLDER, RESOURCE_PLACEHOLDER};
use crate::rate_limit::RateLimiter;

/// The regional registries, in the order the cascade consults them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistryKind {
    Ripe,
    Lacnic,
    Apnic,
    Afrinic,
    Arin,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source(), f)
    }
}

/// Holder and country reported for an AS number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsnDetails {
    pub holder: Option<String>,
    pub country: Option<String>,
}

impl AsnDetails {
    fn from_parts(holder: Option<String>, country: Option<String>) -> Option<Self> {
        let holder = holder.filter(|h| is_meaningful(Some(h.as_str())));
        let country = country.filter(|c| is_meaningful(Some(c.as_str())));
        if holder.is_none() && country.is_none() {
            None
        } else {
            Some(Self { holder, country })
        }
    }
}

impl RegistryKind {
    pub fn source(&self) -> Source {
        match self {
            RegistryKind::Ripe => Source::Ripe,
            RegistryKind::Lacnic => Source::Lacnic,
            RegistryKind::Apnic => Source::Apnic,
            RegistryKind::Afrinic => Source::Afrinic,
            RegistryKind::Arin => Source::Arin,
        }
    }

    /// Parse a block-level response into the common record shape
    pub fn parse_block_response(&self, body: &Value) -> Option<AttributionRecord> {
        match self {
            RegistryKind::Ripe => parse_ripestat_prefix(body),
            RegistryKind::Lacnic | RegistryKind::Apnic | RegistryKind::Afrinic => {
                parse_rdap_ip_entity(body, self.source())
            }
            RegistryKind::Arin => parse_arin_network(body),
        }
    }

    /// Parse an ASN-level response into holder/country details
    pub fn parse_asn_response(&self, body: &Value) -> Option<AsnDetails> {
        match self {
            RegistryKind::Ripe => {
                let holder = body["data"]["holder"].as_str().map(str::to_string);
                AsnDetails::from_parts(holder, None)
            }
            _ => {
                let holder = body["name"]
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| body["entities"].get(0).and_then(vcard_full_name));
                let country = body["country"].as_str().map(str::to_string);
                AsnDetails::from_parts(holder, country)
            }
        }
    }
}

// RIPEstat: {"data": {"asns": [{"asn": 3333, "holder": "RIPE-NCC-AS"}]}}
fn parse_ripestat_prefix(body: &Value) -> Option<AttributionRecord> {
    let first = body["data"]["asns"].get(0)?;
    let asn = first.get("asn").and_then(json_scalar)?;
    let holder = first.get("holder").and_then(json_scalar).unwrap_or_default();
    Some(AttributionRecord::new(asn, holder, None, Source::Ripe))
}

// RDAP ip network: first entity's handle is the AS, its name the holder
fn parse_rdap_ip_entity(body: &Value, source: Source) -> Option<AttributionRecord> {
    let entity = body["entities"].get(0)?;
    let handle = entity.get("handle").and_then(Value::as_str)?;
    let holder = entity
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| vcard_full_name(entity))
        .unwrap_or_default();
    let country = body["country"].as_str();
    Some(AttributionRecord::new(strip_as_prefix(handle), holder, country, source))
}

// ARIN network: originASNs.originASN[0].originAS, falling back to the RDAP
// arin_originas0 extension
fn parse_arin_network(body: &Value) -> Option<AttributionRecord> {
    body.get("handle")?;
    let asn = body["originASNs"]["originASN"]
        .get(0)
        .and_then(|origin| origin.get("originAS"))
        .and_then(json_scalar)
        .or_else(|| {
            body["arin_originas0_originautnums"]
                .get(0)
                .and_then(json_scalar)
        })
        .map(|asn| strip_as_prefix(&asn))
        .unwrap_or_default();
    let holder = body["name"].as_str().unwrap_or_default();
    let country = body["country"].as_str();
    Some(AttributionRecord::new(asn, holder, country, Source::Arin))
}

/// Client for one registry's endpoints
pub struct RegistryClient {
    kind: RegistryKind,
    endpoints: Vec<String>,
    asn_endpoint: String,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl RegistryClient {
    pub fn new(
        kind: RegistryKind,
        endpoints: Vec<String>,
        asn_endpoint: String,
        client: reqwest::Client,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            kind,
            endpoints,
            asn_endpoint,
            client,
            limiter,
        }
    }

    pub fn from_config(config: &RegistryConfig, client: reqwest::Client, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            config.name,
            config.endpoints.clone(),
            config.asn_endpoint.clone(),
            client,
            limiter,
        )
    }

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    /// Query the registry's primary ASN endpoint
    pub async fn lookup_asn(&self, asn: &str) -> Result<Option<AsnDetails>, SourceError> {
        let url = self.asn_endpoint.replace(ASN_PLACEHOLDER, strip_as_prefix(asn).as_str());
        let body = fetch_json(&self.client, &url).await;
        self.limiter.after_call().await;
        Ok(self.kind.parse_asn_response(&body?))
    }
}

#[async_trait]
impl AttributionSource for RegistryClient {
    fn source(&self) -> Source {
        self.kind.source()
    }

    /// Try each endpoint in order, returning the first valid answer
    async fn lookup(&self, target: &LookupTarget) -> Result<Option<AttributionRecord>, SourceError> {
        let resource = target.block.to_string();
        let mut last_error = None;
        let mut answered = false;

        for template in &self.endpoints {
            let url = template.replace(RESOURCE_PLACEHOLDER, &resource);
            let body = fetch_json(&self.client, &url).await;
            self.limiter.after_call().await;

            match body {
                Ok(body) => {
                    answered = true;
                    match self.kind.parse_block_response(&body) {
                        Some(record) if record.is_valid() => return Ok(Some(record)),
                        Some(_) => debug!("{} returned placeholder data for {}", self.kind, resource),
                        None => debug!("{} response from {} did not match its schema", self.kind, url),
                    }
                }
                Err(e) => {
                    debug!("{} endpoint failed: {}", self.kind, e);
                    last_error = Some(e);
                }
            }
        }

        // Only surface an error when no endpoint answered at all
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ripe_prefix_parser() {
        let body = json!({
            "status": "ok",
            "data": {"resource": "193.0.0.0/16", "asns": [{"asn": 3333, "holder": "RIPE-NCC-AS"}]}
        });
        let record = RegistryKind::Ripe.parse_block_response(&body).unwrap();
        assert_eq!(record.asn.as_deref(), Some("3333"));
        assert_eq!(record.holder.as_deref(), Some("RIPE-NCC-AS"));
        assert_eq!(record.source, Source::Ripe);
        assert!(record.is_valid());
    }

    #[test]
    fn test_ripe_prefix_without_asns_is_absent() {
        let body = json!({"data": {"asns": []}});
        assert!(RegistryKind::Ripe.parse_block_response(&body).is_none());
        assert!(RegistryKind::Ripe.parse_block_response(&json!({"error": "x"})).is_none());
    }

    #[test]
    fn test_rdap_entity_parser_for_lacnic_apnic_afrinic() {
        let body = json!({
            "handle": "200.0.0.0/16",
            "country": "BR",
            "entities": [{"handle": "AS28573", "name": "Claro S.A."}]
        });
        for kind in [RegistryKind::Lacnic, RegistryKind::Apnic, RegistryKind::Afrinic] {
            let record = kind.parse_block_response(&body).unwrap();
            assert_eq!(record.asn.as_deref(), Some("28573"));
            assert_eq!(record.holder.as_deref(), Some("Claro S.A."));
            assert_eq!(record.country.as_deref(), Some("BR"));
            assert_eq!(record.source, kind.source());
        }
    }

    #[test]
    fn test_rdap_entity_uses_vcard_when_name_missing() {
        let body = json!({
            "entities": [{
                "handle": "ORG-EX1-AP",
                "vcardArray": ["vcard", [["fn", {}, "text", "Example Pty Ltd"]]]
            }]
        });
        let record = RegistryKind::Apnic.parse_block_response(&body).unwrap();
        assert_eq!(record.holder.as_deref(), Some("Example Pty Ltd"));
    }

    #[test]
    fn test_arin_parser() {
        let body = json!({
            "handle": "NET-8-8-8-0-1",
            "name": "GOGL",
            "originASNs": {"originASN": [{"originAS": "AS15169"}]}
        });
        let record = RegistryKind::Arin.parse_block_response(&body).unwrap();
        assert_eq!(record.asn.as_deref(), Some("15169"));
        assert_eq!(record.holder.as_deref(), Some("GOGL"));
        assert_eq!(record.source, Source::Arin);
    }

    #[test]
    fn test_arin_parser_rdap_extension_and_missing_handle() {
        let body = json!({
            "handle": "NET-4-0-0-0-1",
            "name": "LVLT-ORG-4-8",
            "arin_originas0_originautnums": [3356]
        });
        let record = RegistryKind::Arin.parse_block_response(&body).unwrap();
        assert_eq!(record.asn.as_deref(), Some("3356"));

        assert!(RegistryKind::Arin.parse_block_response(&json!({"name": "X"})).is_none());
    }

    #[test]
    fn test_asn_parsers() {
        let ripe = json!({"data": {"holder": "GOOGLE - Google LLC", "resource": "15169"}});
        assert_eq!(
            RegistryKind::Ripe.parse_asn_response(&ripe),
            Some(AsnDetails { holder: Some("GOOGLE - Google LLC".to_string()), country: None })
        );

        let autnum = json!({"handle": "AS28573", "name": "CLARO", "country": "BR"});
        assert_eq!(
            RegistryKind::Lacnic.parse_asn_response(&autnum),
            Some(AsnDetails { holder: Some("CLARO".to_string()), country: Some("BR".to_string()) })
        );

        assert_eq!(RegistryKind::Ripe.parse_asn_response(&json!({"data": {}})), None);
        assert_eq!(RegistryKind::Arin.parse_asn_response(&json!({"name": "NA"})), None);
    }

    #[test]
    fn test_registry_names_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            name: RegistryKind,
        }
        let parsed: Wrapper = toml::from_str("name = \"AFRINIC\"").unwrap();
        assert_eq!(parsed.name, RegistryKind::Afrinic);
        assert_eq!(RegistryKind::Ripe.to_string(), "RIPE");
    }
}
