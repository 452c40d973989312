//! Summary and detailed CSV output
//!
//! During a run both files only grow, one block at a time; a block whose
//! writes fail is cut back out before the run moves on. The repair pass is the one writer that replaces a file, and
//! it does so through a temp file and rename.

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Writer, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::attribution::AttributionRecord;
use crate::subnet::NetworkBlock;

pub const SUMMARY_HEADERS: [&str; 5] = ["subnet", "asn", "asn_desc", "country", "count"];
pub const DETAILED_HEADERS: [&str; 5] = ["original_line", "subnet", "asn", "asn_desc", "country"];

/// One row per block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub subnet: NetworkBlock,
    pub asn: String,
    pub asn_desc: String,
    pub country: String,
    pub count: u64,
}

impl SummaryRow {
    pub fn new(block: NetworkBlock, record: &AttributionRecord, count: u64) -> Self {
        Self {
            subnet: block,
            asn: record.asn_str().to_string(),
            asn_desc: record.holder_str().to_string(),
            country: record.country_str().to_string(),
            count,
        }
    }

    pub fn apply(&mut self, record: &AttributionRecord) {
        self.asn = record.asn_str().to_string();
        self.asn_desc = record.holder_str().to_string();
        self.country = record.country_str().to_string();
    }
}

/// One row per input line that matched a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedRow {
    pub original_line: String,
    pub subnet: NetworkBlock,
    pub asn: String,
    pub asn_desc: String,
    pub country: String,
}

impl DetailedRow {
    pub fn new(original_line: &str, block: NetworkBlock, record: &AttributionRecord) -> Self {
        Self {
            original_line: original_line.to_string(),
            subnet: block,
            asn: record.asn_str().to_string(),
            asn_desc: record.holder_str().to_string(),
            country: record.country_str().to_string(),
        }
    }

    pub fn apply(&mut self, record: &AttributionRecord) {
        self.asn = record.asn_str().to_string();
        self.asn_desc = record.holder_str().to_string();
        self.country = record.country_str().to_string();
    }
}

/// Storage behind a [`CsvAppender`]: appended to, synced, and cut back to a
/// committed length when a block has to be undone
pub trait RowFile: Write {
    fn byte_len(&self) -> io::Result<u64>;
    fn sync(&self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl RowFile for File {
    fn byte_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only CSV writer. Rows are encoded into a pending buffer and reach the
/// file only on [`CsvAppender::flush`]; [`CsvAppender::rollback_to`] discards
/// anything pending and cuts the file back to an earlier committed length.
pub struct CsvAppender<T, F: RowFile = File> {
    path: PathBuf,
    file: F,
    pending: Vec<u8>,
    committed: u64,
    _row: PhantomData<T>,
}

impl<T: Serialize> CsvAppender<T> {
    /// Start a new file (truncating any existing one) with a header row
    pub fn create(path: &Path, headers: &[&str]) -> Result<Self> {
        let file = Self::open_append(path)?;
        file.set_len(0)
            .with_context(|| format!("Failed to truncate {}", path.display()))?;
        Self::from_file(path, file, headers, true)
    }

    /// Open for appending; the header row is written only when the file is new or empty
    pub fn open(path: &Path, headers: &[&str]) -> Result<Self> {
        let file = Self::open_append(path)?;
        let needs_header = file.byte_len()? == 0;
        Self::from_file(path, file, headers, needs_header)
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for appending", path.display()))
    }
}

impl<T: Serialize, F: RowFile> CsvAppender<T, F> {
    /// Wrap an already opened file positioned for appending
    pub fn from_file(path: &Path, file: F, headers: &[&str], needs_header: bool) -> Result<Self> {
        let committed = file.byte_len()?;
        let mut appender = Self {
            path: path.to_path_buf(),
            file,
            pending: Vec::new(),
            committed,
            _row: PhantomData,
        };
        if needs_header {
            debug!("Writing header row to {}", path.display());
            let mut encoder = Self::encoder();
            encoder.write_record(headers)?;
            appender.push_encoded(encoder)?;
            appender.flush()?;
        }
        Ok(appender)
    }

    fn encoder() -> Writer<Vec<u8>> {
        WriterBuilder::new().has_headers(false).from_writer(Vec::new())
    }

    fn push_encoded(&mut self, encoder: Writer<Vec<u8>>) -> Result<()> {
        let bytes = encoder
            .into_inner()
            .map_err(|e| anyhow!("Failed to encode row for {}: {}", self.path.display(), e.error()))?;
        self.pending.extend_from_slice(&bytes);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length covered by successful flushes
    pub fn committed_len(&self) -> u64 {
        self.committed
    }

    pub fn append(&mut self, row: &T) -> Result<()> {
        let mut encoder = Self::encoder();
        encoder
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        self.push_encoded(encoder)
    }

    /// Write pending rows and sync them to disk. On failure the pending rows
    /// are dropped; the file may hold a torn tail until rolled back.
    pub fn flush(&mut self) -> Result<()> {
        let bytes = std::mem::take(&mut self.pending);
        self.file
            .write_all(&bytes)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync())
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        self.committed += bytes.len() as u64;
        Ok(())
    }

    /// Drop pending rows and cut the file back to `len` bytes
    pub fn rollback_to(&mut self, len: u64) -> Result<()> {
        self.pending.clear();
        self.file
            .truncate(len)
            .and_then(|_| self.file.sync())
            .with_context(|| format!("Failed to roll back {} to {} bytes", self.path.display(), len))?;
        self.committed = len;
        Ok(())
    }
}

/// Read every row of a CSV file with a header line
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Replace a CSV file in full: write a sibling temp file, sync, then rename over the original
pub fn rewrite_rows<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    {
        let file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(headers)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    debug!("Rewrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
