//! Missing-attribution repair
//!
//! A maintenance pass over a finished run: every detailed row still marked
//! unresolved is retried through the DNS origin/ASN zones, and the owning
//! block's summary row is corrected too when it is unresolved as well. Both
//! files are rewritten in full, and only when something changed.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info};

use crate::attribution::{is_unresolved_pair, AttributionRecord};
use crate::export::{read_rows, rewrite_rows, DetailedRow, SummaryRow, DETAILED_HEADERS, SUMMARY_HEADERS};
use crate::sources::dns::CymruDnsClient;
use crate::sources::SourceError;
use crate::subnet::line_address;

/// Resolves a single address to a valid record
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup_address(&self, ip: Ipv4Addr) -> Result<Option<AttributionRecord>, SourceError>;
}

#[async_trait]
impl AddressLookup for CymruDnsClient {
    async fn lookup_address(&self, ip: Ipv4Addr) -> Result<Option<AttributionRecord>, SourceError> {
        self.lookup_ip(ip).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Unresolved detailed rows found
    pub candidates: usize,
    pub repaired_rows: usize,
    pub repaired_summary_rows: usize,
    /// Distinct addresses actually queried
    pub lookups: usize,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.repaired_rows > 0
    }
}

pub struct MissingAttributionRepair<'a, L: ?Sized> {
    lookup: &'a L,
}

impl<'a, L: AddressLookup + ?Sized> MissingAttributionRepair<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    pub async fn repair(&self, summary_path: &Path, detailed_path: &Path) -> Result<RepairReport> {
        let mut detailed: Vec<DetailedRow> = read_rows(detailed_path)?;
        let mut summary: Vec<SummaryRow> = read_rows(summary_path)?;
        let mut report = RepairReport::default();
        let mut cache: HashMap<Ipv4Addr, Option<AttributionRecord>> = HashMap::new();

        for row in detailed.iter_mut() {
            if !is_unresolved_pair(&row.asn, &row.asn_desc) {
                continue;
            }
            report.candidates += 1;

            let Some(ip) = line_address(&row.original_line) else {
                debug!("No address in detailed row {:?}", row.original_line);
                continue;
            };

            let record = match cache.get(&ip) {
                Some(cached) => cached.clone(),
                None => {
                    report.lookups += 1;
                    let found = match self.lookup.lookup_address(ip).await {
                        Ok(found) => found.filter(AttributionRecord::is_valid),
                        Err(e) => {
                            debug!("DNS repair lookup for {} failed: {}", ip, e);
                            None
                        }
                    };
                    cache.insert(ip, found.clone());
                    found
                }
            };

            let Some(record) = record else {
                continue;
            };

            info!("Repaired {} via DNS: AS{} {}", ip, record.asn_str(), record.holder_str());
            row.apply(&record);
            report.repaired_rows += 1;

            if let Some(summary_row) = summary
                .iter_mut()
                .find(|s| s.subnet == row.subnet && is_unresolved_pair(&s.asn, &s.asn_desc))
            {
                summary_row.apply(&record);
                report.repaired_summary_rows += 1;
            }
        }

        if report.changed() {
            rewrite_rows(detailed_path, &DETAILED_HEADERS, &detailed)?;
            rewrite_rows(summary_path, &SUMMARY_HEADERS, &summary)?;
        } else {
            debug!("Nothing repaired; output files left untouched");
        }

        Ok(report)
    }
}
