//! Source clients that turn a network block (or a sample address) into an
//! attribution record.
//!
//! Each client speaks one protocol and understands one response shape:
//! - [`bulk`]: Team Cymru bulk whois over a per-call TCP session (port 43)
//! - [`registry`]: one HTTP JSON client per regional internet registry
//! - [`rdap`]: RDAP lookup of a single representative address
//! - [`dns`]: Team Cymru DNS TXT origin and AS-description zones

pub mod bulk;
pub mod dns;
pub mod rdap;
pub mod registry;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::attribution::{AttributionRecord, Source};
use crate::config::HttpConfig;
use crate::subnet::NetworkBlock;

/// Transient failure of a single source. The cascade always recovers from
/// these by moving on to the next source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response from {origin}: {detail}")]
    Malformed { origin: String, detail: String },

    #[error("DNS lookup for {name} failed: {detail}")]
    Dns { name: String, detail: String },
}

/// What a source is asked about: the block, plus one address known to be in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupTarget {
    pub block: NetworkBlock,
    pub sample: Option<Ipv4Addr>,
}

impl LookupTarget {
    pub fn new(block: NetworkBlock, sample: Option<Ipv4Addr>) -> Self {
        Self { block, sample }
    }
}

/// One step of the resolution cascade
#[async_trait]
pub trait AttributionSource: Send + Sync {
    /// Which source tag records from this client carry
    fn source(&self) -> Source;

    /// Look the target up. `Ok(None)` means the source answered but had
    /// nothing usable; `Err` means the source itself failed.
    async fn lookup(&self, target: &LookupTarget) -> Result<Option<AttributionRecord>, SourceError>;
}

/// Build the HTTP client shared by registry and RDAP sources
pub fn build_http_client(config: &HttpConfig) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(&config.user_agent)
        .build()?;
    Ok(client)
}

/// GET a JSON document, mapping every failure mode onto [`SourceError`]
pub(crate) async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<Value, SourceError> {
    debug!("GET {}", url);

    let response = client
        .get(url)
        .header(ACCEPT, "application/json, application/rdap+json")
        .send()
        .await
        .map_err(|e| classify_http_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|e| classify_http_error(url, e))?;
    serde_json::from_str(&body).map_err(|e| SourceError::Malformed {
        origin: url.to_string(),
        detail: format!("invalid JSON: {}", e),
    })
}

fn classify_http_error(url: &str, error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Http {
            url: url.to_string(),
            source: error,
        }
    }
}

/// Render a JSON scalar (string or number) as a string
pub(crate) fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Strip a leading `AS`/`as` from an AS handle such as `AS15169`
pub(crate) fn strip_as_prefix(handle: &str) -> String {
    let trimmed = handle.trim();
    match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("AS") => trimmed[2..].trim().to_string(),
        _ => trimmed.to_string(),
    }
}

/// Full name (`fn`) from an RDAP entity's jCard, used when the entity has no `name`
pub(crate) fn vcard_full_name(entity: &Value) -> Option<String> {
    entity["vcardArray"][1]
        .as_array()?
        .iter()
        .find(|prop| prop[0].as_str() == Some("fn"))
        .and_then(|prop| prop[3].as_str())
        .map(str::to_string)
}
