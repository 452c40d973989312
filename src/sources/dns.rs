//! Team Cymru DNS TXT lookups (IP → origin ASN, ASN → description)
//!
//! TXT queries go to DNS-over-HTTPS servers first, then to plain DNS servers over
//! UDP with a TCP retry, and finally to the system resolver.

use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{AttributionSource, LookupTarget, SourceError};
use crate::attribution::{is_meaningful, AttributionRecord, Source};
use crate::config::{DnsConfig, HttpConfig};
use crate::rate_limit::RateLimiter;

/// DNS over HTTPS server (JSON API)
#[derive(Debug, Clone)]
struct DohServer {
    url: String,
    name: String,
    timeout_secs: u64,
}

/// Traditional DNS server
#[derive(Debug, Clone)]
struct DnsServer {
    address: String,
    name: String,
    timeout_secs: u64,
}

/// Rotating pool of TXT resolvers
pub struct TxtResolverPool {
    doh_servers: Vec<DohServer>,
    dns_servers: Vec<DnsServer>,
    current_doh_index: AtomicUsize,
    current_dns_index: AtomicUsize,
    system_fallback: bool,
    client: reqwest::Client,
}

impl TxtResolverPool {
    /// Create a pool from configuration
    pub fn from_config(config: &DnsConfig, http: &HttpConfig) -> anyhow::Result<Self> {
        let doh_servers = config
            .doh_servers
            .iter()
            .map(|s| DohServer {
                url: s.url.clone(),
                name: s.name.clone(),
                timeout_secs: s.timeout_secs,
            })
            .collect();

        let dns_servers = config
            .dns_servers
            .iter()
            .map(|s| DnsServer {
                address: s.address.clone(),
                name: s.name.clone(),
                timeout_secs: s.timeout_secs,
            })
            .collect();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .user_agent(&http.user_agent)
            .build()?;

        Ok(Self {
            doh_servers,
            dns_servers,
            current_doh_index: AtomicUsize::new(0),
            current_dns_index: AtomicUsize::new(0),
            system_fallback: true,
            client,
        })
    }

    /// Pool that only talks to the given DoH endpoints (no plain DNS, no system
    /// resolver). Used to point lookups at mock servers.
    pub fn with_doh_urls(urls: Vec<String>) -> anyhow::Result<Self> {
        let doh_servers = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| DohServer {
                url,
                name: format!("DoH server {}", i + 1),
                timeout_secs: 5,
            })
            .collect();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            doh_servers,
            dns_servers: Vec::new(),
            current_doh_index: AtomicUsize::new(0),
            current_dns_index: AtomicUsize::new(0),
            system_fallback: false,
            client,
        })
    }

    fn next_doh_server(&self) -> Option<&DohServer> {
        if self.doh_servers.is_empty() {
            return None;
        }
        let index = self.current_doh_index.fetch_add(1, Ordering::Relaxed) % self.doh_servers.len();
        Some(&self.doh_servers[index])
    }

    fn next_dns_server(&self) -> Option<&DnsServer> {
        if self.dns_servers.is_empty() {
            return None;
        }
        let index = self.current_dns_index.fetch_add(1, Ordering::Relaxed) % self.dns_servers.len();
        Some(&self.dns_servers[index])
    }

    /// DNS over HTTPS TXT lookup using the JSON API
    async fn doh_txt_lookup(&self, name: &str, server: &DohServer) -> anyhow::Result<Vec<String>> {
        debug!("DoH TXT lookup for {} using {}", name, server.name);

        let response = self
            .client
            .get(&server.url)
            .query(&[("name", name), ("type", "TXT")])
            .header("Accept", "application/dns-json")
            .timeout(Duration::from_secs(server.timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        let mut records = Vec::new();
        if let Some(answers) = response["Answer"].as_array() {
            for answer in answers {
                if answer["type"].as_u64() == Some(16) {
                    if let Some(data) = answer["data"].as_str() {
                        records.push(unescape_dns_txt(data.trim().trim_matches('"')));
                    }
                }
            }
        }

        Ok(records)
    }

    fn create_dns_resolver(&self, server: &DnsServer, use_tcp: bool) -> anyhow::Result<TokioAsyncResolver> {
        let mut config = ResolverConfig::new();

        let socket_addr = server.address.parse::<std::net::SocketAddr>().map_err(|e| {
            anyhow::anyhow!("Invalid DNS server address '{}' for server '{}': {}", server.address, server.name, e)
        })?;

        let protocol = if use_tcp { Protocol::Tcp } else { Protocol::Udp };
        config.add_name_server(NameServerConfig::new(socket_addr, protocol));

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(server.timeout_secs);
        opts.attempts = 1;
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4thenIpv6;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    /// Resolve TXT records for `name`, trying each transport in turn
    pub async fn txt_records(&self, name: &str) -> Result<Vec<String>, SourceError> {
        for attempt in 0..self.doh_servers.len().min(2) {
            let Some(server) = self.next_doh_server() else { break };
            match self.doh_txt_lookup(name, server).await {
                Ok(records) if !records.is_empty() => return Ok(records),
                Ok(_) => debug!("DoH attempt {} for {} via {} returned no TXT records", attempt + 1, name, server.name),
                Err(e) => debug!("DoH attempt {} for {} via {} failed: {}", attempt + 1, name, server.name, e),
            }
        }

        for _ in 0..self.dns_servers.len().min(2) {
            let Some(server) = self.next_dns_server() else { break };
            for use_tcp in [false, true] {
                let resolver = match self.create_dns_resolver(server, use_tcp) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("{}", e);
                        break;
                    }
                };
                match resolver.txt_lookup(name).await {
                    Ok(lookup) => return Ok(lookup.iter().map(|txt| txt.to_string()).collect()),
                    Err(e) => debug!(
                        "{} TXT lookup for {} via {} failed: {}",
                        if use_tcp { "TCP" } else { "UDP" },
                        name,
                        server.name,
                        e
                    ),
                }
            }
        }

        if !self.system_fallback {
            return Err(SourceError::Dns {
                name: name.to_string(),
                detail: "no configured resolver returned TXT records".to_string(),
            });
        }

        debug!("All configured resolvers failed for {}, trying system resolver", name);
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| SourceError::Dns {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        let lookup = resolver.txt_lookup(name).await.map_err(|e| SourceError::Dns {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        Ok(lookup.iter().map(|txt| txt.to_string()).collect())
    }
}

/// Origin data for an address: `ASN | prefix | CC | registry | allocated`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginInfo {
    pub asn: String,
    pub prefix: Option<String>,
    pub country: Option<String>,
}

/// Team Cymru DNS client
pub struct CymruDnsClient {
    pool: TxtResolverPool,
    origin_zone: String,
    asn_zone: String,
    limiter: Arc<RateLimiter>,
}

impl CymruDnsClient {
    pub fn new(
        pool: TxtResolverPool,
        origin_zone: impl Into<String>,
        asn_zone: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            pool,
            origin_zone: origin_zone.into(),
            asn_zone: asn_zone.into(),
            limiter,
        }
    }

    pub fn from_config(config: &DnsConfig, http: &HttpConfig, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        Ok(Self::new(
            TxtResolverPool::from_config(config, http)?,
            config.origin_zone.clone(),
            config.asn_zone.clone(),
            limiter,
        ))
    }

    /// `d.c.b.a.<origin zone>` for address `a.b.c.d`
    pub fn origin_name(&self, ip: Ipv4Addr) -> String {
        let [a, b, c, d] = ip.octets();
        format!("{}.{}.{}.{}.{}", d, c, b, a, self.origin_zone)
    }

    /// `AS<asn>.<asn zone>`
    pub fn asn_name(&self, asn: &str) -> String {
        format!("AS{}.{}", asn, self.asn_zone)
    }

    /// Origin ASN (and country) announcing the address
    pub async fn origin(&self, ip: Ipv4Addr) -> Result<Option<OriginInfo>, SourceError> {
        let records = self.pool.txt_records(&self.origin_name(ip)).await;
        self.limiter.after_call().await;
        Ok(records?.iter().find_map(|txt| parse_origin_txt(txt)))
    }

    /// Descriptive holder string for an ASN
    pub async fn asn_description(&self, asn: &str) -> Result<Option<String>, SourceError> {
        let records = self.pool.txt_records(&self.asn_name(asn)).await;
        self.limiter.after_call().await;
        Ok(records?.iter().find_map(|txt| parse_asn_txt(txt)))
    }

    /// Both lookups: address → ASN, then ASN → holder
    pub async fn lookup_ip(&self, ip: Ipv4Addr) -> Result<Option<AttributionRecord>, SourceError> {
        let Some(origin) = self.origin(ip).await? else {
            return Ok(None);
        };
        let Some(holder) = self.asn_description(&origin.asn).await? else {
            return Ok(None);
        };
        let record = AttributionRecord::new(&origin.asn, holder, origin.country.as_deref(), Source::Dns);
        Ok(Some(record).filter(AttributionRecord::is_valid))
    }
}

#[async_trait]
impl AttributionSource for CymruDnsClient {
    fn source(&self) -> Source {
        Source::Dns
    }

    async fn lookup(&self, target: &LookupTarget) -> Result<Option<AttributionRecord>, SourceError> {
        match target.sample {
            Some(ip) => self.lookup_ip(ip).await,
            None => Ok(None),
        }
    }
}

/// Parse `"15169 | 8.8.8.0/24 | US | arin | 2000-03-30"`. When several origin
/// ASNs are listed (`"15169 36040 | ..."`) the first one is used.
pub fn parse_origin_txt(txt: &str) -> Option<OriginInfo> {
    let fields: Vec<&str> = txt.trim().trim_matches('"').split('|').map(str::trim).collect();
    let asn = fields.first()?.split_whitespace().next()?;
    if !asn.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(OriginInfo {
        asn: asn.to_string(),
        prefix: fields.get(1).filter(|p| !p.is_empty()).map(|p| p.to_string()),
        country: fields.get(2).filter(|c| !c.is_empty()).map(|c| c.to_string()),
    })
}

/// Parse `"15169 | US | arin | 2000-03-30 | GOOGLE, US"` into its description
pub fn parse_asn_txt(txt: &str) -> Option<String> {
    let description = txt.trim().trim_matches('"').split('|').nth(4)?.trim();
    is_meaningful(Some(description)).then(|| description.to_string())
}

fn unescape_dns_txt(s: &str) -> String {
    s.replace("\\\"", "\"").replace("\\\\", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CymruDnsClient {
        CymruDnsClient::new(
            TxtResolverPool::with_doh_urls(vec![]).unwrap(),
            "origin.asn.cymru.com",
            "asn.cymru.com",
            Arc::new(RateLimiter::disabled()),
        )
    }

    #[test]
    fn test_query_names() {
        let client = client();
        assert_eq!(
            client.origin_name(Ipv4Addr::new(8, 8, 4, 4)),
            "4.4.8.8.origin.asn.cymru.com"
        );
        assert_eq!(client.asn_name("15169"), "AS15169.asn.cymru.com");
    }

    #[test]
    fn test_parse_origin_txt() {
        let origin = parse_origin_txt("\"15169 | 8.8.8.0/24 | US | arin | 2000-03-30\"").unwrap();
        assert_eq!(origin.asn, "15169");
        assert_eq!(origin.prefix.as_deref(), Some("8.8.8.0/24"));
        assert_eq!(origin.country.as_deref(), Some("US"));

        let multi = parse_origin_txt("13335 209242 | 104.16.0.0/13 | US | arin |").unwrap();
        assert_eq!(multi.asn, "13335");

        assert!(parse_origin_txt("").is_none());
        assert!(parse_origin_txt("NA | 10.0.0.0/8 |").is_none());
    }

    #[test]
    fn test_parse_asn_txt() {
        assert_eq!(
            parse_asn_txt("15169 | US | arin | 2000-03-30 | GOOGLE, US"),
            Some("GOOGLE, US".to_string())
        );
        assert_eq!(parse_asn_txt("15169 | US | arin"), None);
        assert_eq!(parse_asn_txt("15169 | US | arin | 2000-03-30 | "), None);
    }

    #[tokio::test]
    async fn test_pool_without_servers_reports_error() {
        let pool = TxtResolverPool::with_doh_urls(vec![]).unwrap();
        let result = pool.txt_records("4.4.8.8.origin.asn.cymru.com").await;
        assert!(matches!(result, Err(SourceError::Dns { .. })));
    }

    #[tokio::test]
    async fn test_lookup_without_sample_is_absent() {
        let client = client();
        let target = LookupTarget::new("8.8.0.0/16".parse().unwrap(), None);
        assert!(client.lookup(&target).await.unwrap().is_none());
    }
}
