//! Team Cymru bulk whois client (port 43 line protocol)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{AttributionSource, LookupTarget, SourceError};
use crate::attribution::{AttributionRecord, Source};
use crate::config::BulkConfig;
use crate::rate_limit::RateLimiter;
use crate::subnet::NetworkBlock;

/// Upper bound on a single bulk response
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

// Verbose layout: AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name
const FIELD_ASN: usize = 0;
const FIELD_COUNTRY: usize = 3;
const FIELD_AS_NAME: usize = 6;

pub struct BulkWhoisClient {
    host: String,
    port: u16,
    timeout: Duration,
    limiter: Arc<RateLimiter>,
}

impl BulkWhoisClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration, limiter: Arc<RateLimiter>) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            limiter,
        }
    }

    pub fn from_config(config: &BulkConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            Duration::from_secs(config.timeout_secs),
            limiter,
        )
    }

    /// Open a session, send one request naming the block and read until the server hangs up
    async fn query(&self, block: &NetworkBlock) -> Result<String, SourceError> {
        let request = build_request(block);
        let endpoint = format!("{}:{}", self.host, self.port);
        debug!("Bulk whois query for {} via {}", block, endpoint);

        let exchange = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;

            let mut raw = Vec::new();
            (&mut stream).take(MAX_RESPONSE_BYTES).read_to_end(&mut raw).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&raw).into_owned())
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map_err(SourceError::from),
            Err(_) => Err(SourceError::Timeout(endpoint)),
        }
    }
}

#[async_trait]
impl AttributionSource for BulkWhoisClient {
    fn source(&self) -> Source {
        Source::TeamCymru
    }

    async fn lookup(&self, target: &LookupTarget) -> Result<Option<AttributionRecord>, SourceError> {
        let response = self.query(&target.block).await;
        self.limiter.after_call().await;
        Ok(parse_bulk_response(&response?))
    }
}

/// The bulk request for one block. The network address stands in for the block
/// since the service resolves addresses, not prefixes.
pub fn build_request(block: &NetworkBlock) -> String {
    format!("begin\nverbose\n{}\nend\n", block.network())
}

/// Parse the first data line of a verbose bulk response
pub fn parse_bulk_response(response: &str) -> Option<AttributionRecord> {
    let line = response
        .lines()
        .map(str::trim)
        .filter(|line| line.contains('|') && !line.starts_with("Bulk"))
        .find(|line| !is_header_line(line))?;

    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let asn = fields.get(FIELD_ASN).copied().unwrap_or("");
    let holder = fields.get(FIELD_AS_NAME).copied().unwrap_or("");
    let country = fields.get(FIELD_COUNTRY).copied();

    Some(AttributionRecord::new(asn, holder, country, Source::TeamCymru))
}

fn is_header_line(line: &str) -> bool {
    line.split('|')
        .next()
        .map(|first| first.trim().eq_ignore_ascii_case("AS"))
        .unwrap_or(false)
}
