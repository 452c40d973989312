//! Network block derivation and per-block occurrence counting

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use anyhow::{anyhow, Context, Result};

static IPV4_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap()
});

/// Prefix length of every block
pub const BLOCK_PREFIX_LEN: u8 = 16;

/// A /16 network derived from the first two octets of an IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkBlock {
    first: u8,
    second: u8,
}

impl NetworkBlock {
    pub fn from_addr(addr: Ipv4Addr) -> Self {
        let [first, second, _, _] = addr.octets();
        Self { first, second }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.first, self.second, 0, 0)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        Self::from_addr(addr) == *self
    }
}

impl fmt::Display for NetworkBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.0.0/{}", self.first, self.second, BLOCK_PREFIX_LEN)
    }
}

impl FromStr for NetworkBlock {
    type Err = anyhow::Error;

    /// Parses the normalized form `a.b.0.0/16`
    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("Missing prefix length in block '{}'", s))?;
        if len != BLOCK_PREFIX_LEN.to_string() {
            return Err(anyhow!("Unsupported prefix length in block '{}'", s));
        }
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| anyhow!("Invalid network address in block '{}': {}", s, e))?;
        let block = Self::from_addr(addr);
        if block.network() != addr {
            return Err(anyhow!("Block '{}' has host bits set", s));
        }
        Ok(block)
    }
}

impl TryFrom<String> for NetworkBlock {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NetworkBlock> for String {
    fn from(block: NetworkBlock) -> Self {
        block.to_string()
    }
}

/// Blocks in ascending order plus how many address tokens fell in each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub blocks: Vec<NetworkBlock>,
    pub counts: BTreeMap<NetworkBlock, u64>,
}

impl Aggregation {
    pub fn count(&self, block: &NetworkBlock) -> u64 {
        self.counts.get(block).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Group every IPv4 literal found in the input into /16 blocks.
/// Tokens that look like addresses but do not parse (e.g. `300.1.1.1`) are skipped.
pub fn aggregate<I, S>(lines: I) -> Aggregation
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: BTreeMap<NetworkBlock, u64> = BTreeMap::new();

    for line in lines {
        for token in IPV4_TOKEN_REGEX.find_iter(line.as_ref()) {
            if let Ok(addr) = token.as_str().parse::<Ipv4Addr>() {
                *counts.entry(NetworkBlock::from_addr(addr)).or_insert(0) += 1;
            }
        }
    }

    Aggregation {
        blocks: counts.keys().copied().collect(),
        counts,
    }
}

/// The address in the second whitespace-delimited field of a log line, if any
pub fn line_address(line: &str) -> Option<Ipv4Addr> {
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Lines of an input log. Bytes that are not valid UTF-8 are replaced, so a
/// damaged line only loses the tokens it garbles.
pub fn read_log_lines(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read input log {}", path.display()))?;
    Ok(bytes
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect())
}
