//! Configuration management for ipattrib
//!
//! All configuration is loaded from `./config/ipattrib.toml` (or an explicit path).
//! No hardcoded defaults exist in source code - all defaults are in the config template.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;

use crate::sources::registry::RegistryKind;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/ipattrib.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/ipattrib.toml");

/// Placeholder substituted with the network block in registry endpoint templates
pub const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Placeholder substituted with the bare AS number in ASN endpoint templates
pub const ASN_PLACEHOLDER: &str = "{asn}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Endpoint in '{field}' is missing the {placeholder} placeholder: {url}")]
    MissingPlaceholder {
        field: String,
        placeholder: &'static str,
        url: String,
    },

    #[error("Invalid address in '{field}': {address} (expected ip:port format)")]
    InvalidAddress { field: String, address: String },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Registry {0} is configured more than once")]
    DuplicateRegistry(RegistryKind),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub rate_limit: RateLimitConfig,
    pub bulk: BulkConfig,
    pub registries: Vec<RegistryConfig>,
    pub rdap: RdapConfig,
    pub dns: DnsConfig,
    pub output: OutputConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

/// Fixed pause applied after every outbound call
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub delay_ms: u64,
}

impl RateLimitConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Bulk whois service (port 43 line protocol)
#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

/// One regional registry: its block endpoints (tried in order) and its ASN endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub name: RegistryKind,
    pub endpoints: Vec<String>,
    pub asn_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdapConfig {
    pub base_url: String,
}

/// DNS resolution configuration for the TXT-based ASN lookups
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    pub origin_zone: String,
    pub asn_zone: String,
    #[serde(default)]
    pub doh_servers: Vec<DohServerConfig>,
    #[serde(default)]
    pub dns_servers: Vec<DnsServerConfig>,
}

/// DNS-over-HTTPS server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DohServerConfig {
    pub name: String,
    pub url: String,
    pub timeout_secs: u64,
}

/// Traditional DNS server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsServerConfig {
    pub name: String,
    pub address: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub prefix: String,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded default configuration
    pub fn embedded_default() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.user_agent.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "http.user_agent".to_string(),
            });
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "http.request_timeout_secs".to_string(),
            });
        }

        if self.bulk.host.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "bulk.host".to_string(),
            });
        }

        let mut seen = Vec::new();
        for (i, registry) in self.registries.iter().enumerate() {
            if seen.contains(&registry.name) {
                return Err(ConfigError::DuplicateRegistry(registry.name));
            }
            seen.push(registry.name);

            if registry.endpoints.is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: format!("registries[{}].endpoints", i),
                });
            }
            for (j, endpoint) in registry.endpoints.iter().enumerate() {
                let field = format!("registries[{}].endpoints[{}]", i, j);
                validate_http_url(&field, endpoint)?;
                require_placeholder(&field, endpoint, RESOURCE_PLACEHOLDER)?;
            }

            let field = format!("registries[{}].asn_endpoint", i);
            validate_http_url(&field, &registry.asn_endpoint)?;
            require_placeholder(&field, &registry.asn_endpoint, ASN_PLACEHOLDER)?;
        }

        validate_http_url("rdap.base_url", &self.rdap.base_url)?;

        if self.dns.origin_zone.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "dns.origin_zone".to_string(),
            });
        }
        if self.dns.asn_zone.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "dns.asn_zone".to_string(),
            });
        }

        for (i, server) in self.dns.doh_servers.iter().enumerate() {
            if !server.url.starts_with("https://") {
                return Err(ConfigError::InvalidUrl {
                    field: format!("dns.doh_servers[{}].url", i),
                    url: server.url.clone(),
                });
            }
        }

        for (i, server) in self.dns.dns_servers.iter().enumerate() {
            if server.address.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::InvalidAddress {
                    field: format!("dns.dns_servers[{}].address", i),
                    address: server.address.clone(),
                });
            }
        }

        if self.output.prefix.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "output.prefix".to_string(),
            });
        }

        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            url: url.to_string(),
        })
    }
}

fn require_placeholder(field: &str, url: &str, placeholder: &'static str) -> Result<(), ConfigError> {
    if url.contains(placeholder) {
        Ok(())
    } else {
        Err(ConfigError::MissingPlaceholder {
            field: field.to_string(),
            placeholder,
            url: url.to_string(),
        })
    }
}
