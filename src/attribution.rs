//! Attribution records and the validity rules applied to every source answer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder meaning "no data", distinct from a present-but-empty value
pub const NA: &str = "NA";

/// Which source produced an attribution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    TeamCymru,
    #[serde(rename = "RIPE")]
    Ripe,
    #[serde(rename = "LACNIC")]
    Lacnic,
    #[serde(rename = "APNIC")]
    Apnic,
    #[serde(rename = "AFRINIC")]
    Afrinic,
    #[serde(rename = "ARIN")]
    Arin,
    #[serde(rename = "RDAP")]
    Rdap,
    #[serde(rename = "DNS")]
    Dns,
    None,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::TeamCymru => "Team Cymru",
            Source::Ripe => "RIPE",
            Source::Lacnic => "LACNIC",
            Source::Apnic => "APNIC",
            Source::Afrinic => "AFRINIC",
            Source::Arin => "ARIN",
            Source::Rdap => "RDAP",
            Source::Dns => "DNS",
            Source::None => "none",
        };
        f.write_str(name)
    }
}

/// Ownership metadata for a network block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub asn: Option<String>,
    pub holder: Option<String>,
    pub country: Option<String>,
    pub source: Source,
}

impl AttributionRecord {
    /// Build a record from raw source fields, trimming whitespace and stray quotes.
    /// Empty strings become absent values.
    pub fn new(
        asn: impl AsRef<str>,
        holder: impl AsRef<str>,
        country: Option<&str>,
        source: Source,
    ) -> Self {
        Self {
            asn: clean_field(asn.as_ref()),
            holder: clean_field(holder.as_ref()),
            country: country.and_then(clean_field),
            source,
        }
    }

    /// The canonical "nothing found" record
    pub fn unresolved() -> Self {
        Self {
            asn: Some(NA.to_string()),
            holder: Some(NA.to_string()),
            country: None,
            source: Source::None,
        }
    }

    /// A record is valid when both asn and holder carry real data
    pub fn is_valid(&self) -> bool {
        is_meaningful(self.asn.as_deref()) && is_meaningful(self.holder.as_deref())
    }

    /// Whether the record carries an ASN worth enriching
    pub fn has_asn(&self) -> bool {
        is_meaningful(self.asn.as_deref())
    }

    /// Keep valid records, collapse everything else to the canonical unresolved record
    pub fn normalized(self) -> Self {
        if self.is_valid() {
            self
        } else {
            Self::unresolved()
        }
    }

    pub fn asn_str(&self) -> &str {
        self.asn.as_deref().unwrap_or("")
    }

    pub fn holder_str(&self) -> &str {
        self.holder.as_deref().unwrap_or("")
    }

    pub fn country_str(&self) -> &str {
        self.country.as_deref().unwrap_or("")
    }
}

/// True when a value is present, non-empty and not the "NA" sentinel (any case)
pub fn is_meaningful(value: Option<&str>) -> bool {
    match value {
        Some(v) => {
            let v = v.trim().trim_matches('"').trim();
            !v.is_empty() && !v.eq_ignore_ascii_case(NA)
        }
        None => false,
    }
}

/// Whether a stored asn/holder pair means "unresolved".
/// Both fields must be placeholders (or both missing) for the row to count.
pub fn is_unresolved_pair(asn: &str, holder: &str) -> bool {
    let asn_missing = !is_meaningful(Some(asn));
    let holder_missing = !is_meaningful(Some(holder));
    asn_missing && holder_missing
}

fn clean_field(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
