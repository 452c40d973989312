//! Checkpointed batch driver
//!
//! Walks every block in ascending order, resolving each one that the run's
//! checkpoint log does not already list. A block's summary row and detailed
//! rows are flushed before the block is appended to the log, so a crash at any
//! point leaves the block either fully recorded or due for a retry. When any of
//! those writes fails, all three files are cut back to their lengths from before
//! the block, so a retried block never duplicates rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use tracing::{debug, info, warn};

use crate::attribution::AttributionRecord;
use crate::cascade::ResolutionCascade;
use crate::checkpoint::{BatchRun, CheckpointLog};
use crate::enrich::EnrichmentStep;
use crate::export::{CsvAppender, DetailedRow, RowFile, SummaryRow, DETAILED_HEADERS, SUMMARY_HEADERS};
use crate::logger::RunLogger;
use crate::sources::LookupTarget;
use crate::subnet::{aggregate, line_address, NetworkBlock};

/// Lifecycle of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fresh,
    Resuming,
    Running,
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Fresh => "fresh",
            RunState::Resuming => "resuming",
            RunState::Running => "running",
            RunState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Produces the final record for one block
#[async_trait]
pub trait BlockResolver: Send + Sync {
    async fn resolve_block(&self, target: &LookupTarget) -> Result<AttributionRecord>;
}

/// Cascade followed by enrichment whenever the cascade found an ASN
pub struct CascadeResolver {
    cascade: ResolutionCascade,
    enrichment: EnrichmentStep,
}

impl CascadeResolver {
    pub fn new(cascade: ResolutionCascade, enrichment: EnrichmentStep) -> Self {
        Self { cascade, enrichment }
    }
}

#[async_trait]
impl BlockResolver for CascadeResolver {
    async fn resolve_block(&self, target: &LookupTarget) -> Result<AttributionRecord> {
        let record = self.cascade.resolve(target).await;
        if !record.has_asn() {
            return Ok(record);
        }
        let asn = record.asn_str().to_string();
        Ok(self.enrichment.enrich(&asn, record).await)
    }
}

/// Outcome of one driver pass
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: BatchRun,
    pub total_blocks: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub state: RunState,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// The three files a run writes, kept consistent with each other block by block
pub struct RunOutputs<F: RowFile = File> {
    summary: CsvAppender<SummaryRow, F>,
    detailed: CsvAppender<DetailedRow, F>,
    log: CheckpointLog,
}

/// File lengths before a block, for undoing it
#[derive(Debug, Clone, Copy)]
struct OutputMarks {
    summary: u64,
    detailed: u64,
    log: u64,
}

impl RunOutputs {
    /// Fresh runs start all three files empty; resumed runs append to them
    pub fn open(run: &BatchRun, resume: bool) -> Result<Self> {
        if resume {
            Ok(Self::new(
                CsvAppender::open(&run.summary_path, &SUMMARY_HEADERS)?,
                CsvAppender::open(&run.detailed_path, &DETAILED_HEADERS)?,
                CheckpointLog::open(&run.checkpoint_path)?,
            ))
        } else {
            Ok(Self::new(
                CsvAppender::create(&run.summary_path, &SUMMARY_HEADERS)?,
                CsvAppender::create(&run.detailed_path, &DETAILED_HEADERS)?,
                CheckpointLog::create(&run.checkpoint_path)?,
            ))
        }
    }
}

impl<F: RowFile> RunOutputs<F> {
    pub fn new(
        summary: CsvAppender<SummaryRow, F>,
        detailed: CsvAppender<DetailedRow, F>,
        log: CheckpointLog,
    ) -> Self {
        Self { summary, detailed, log }
    }

    fn marks(&self) -> Result<OutputMarks> {
        Ok(OutputMarks {
            summary: self.summary.committed_len(),
            detailed: self.detailed.committed_len(),
            log: self.log.byte_len()?,
        })
    }

    fn rollback(&mut self, marks: OutputMarks) -> Result<()> {
        self.summary.rollback_to(marks.summary)?;
        self.detailed.rollback_to(marks.detailed)?;
        self.log.rollback_to(marks.log)
    }

    /// Both CSVs first, then the checkpoint entry
    fn write_block(
        &mut self,
        block: NetworkBlock,
        record: &AttributionRecord,
        count: u64,
        block_lines: &[&String],
    ) -> Result<()> {
        self.summary.append(&SummaryRow::new(block, record, count))?;
        for line in block_lines {
            self.detailed.append(&DetailedRow::new(line, block, record))?;
        }
        self.summary.flush()?;
        self.detailed.flush()?;

        self.log
            .mark_completed(block)
            .with_context(|| format!("Failed to checkpoint {}", block))
    }
}

pub struct CheckpointedBatchDriver<'a, R: ?Sized> {
    resolver: &'a R,
    logger: &'a RunLogger,
    state: RunState,
}

impl<'a, R: BlockResolver + ?Sized> CheckpointedBatchDriver<'a, R> {
    pub fn new(resolver: &'a R, logger: &'a RunLogger) -> Self {
        Self {
            resolver,
            logger,
            state: RunState::Fresh,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Process every block found in `lines` into the run's files.
    /// `resume` reuses the run's existing outputs and checkpoint log.
    pub async fn run(&mut self, run: &BatchRun, resume: bool, lines: &[String]) -> Result<RunReport> {
        let outputs = RunOutputs::open(run, resume)?;
        self.run_with(run, resume, lines, outputs).await
    }

    /// Same as [`Self::run`], writing through already opened outputs
    pub async fn run_with<F: RowFile>(
        &mut self,
        run: &BatchRun,
        resume: bool,
        lines: &[String],
        mut outputs: RunOutputs<F>,
    ) -> Result<RunReport> {
        let aggregation = aggregate(lines);
        let lines_by_block = index_lines(lines);

        self.state = if resume { RunState::Resuming } else { RunState::Fresh };
        info!("Batch run {} is {} with {} blocks", run.timestamp, self.state, aggregation.len());

        if resume {
            self.logger.info(&format!(
                "Resuming run {}: {} of {} blocks already completed",
                run.timestamp,
                outputs.log.len(),
                aggregation.len()
            ));
        }

        self.state = RunState::Running;
        let mut report = RunReport {
            run: run.clone(),
            total_blocks: aggregation.len(),
            processed: 0,
            skipped: 0,
            failed: 0,
            unresolved: 0,
            state: self.state,
        };

        self.logger.start_progress(aggregation.len() as u64);
        let no_lines: Vec<&String> = Vec::new();

        for (index, block) in aggregation.blocks.iter().enumerate() {
            if outputs.log.is_completed(block) {
                debug!("Skipping already completed block {}", block);
                report.skipped += 1;
                self.logger.record_skipped();
                self.logger.advance_progress();
                continue;
            }

            self.logger.set_progress_message(&block.to_string());
            self.logger.debug(&format!("Processing block {}/{}: {}", index + 1, aggregation.len(), block));

            let block_lines = lines_by_block.get(block).unwrap_or(&no_lines);
            let marks = outputs.marks()?;
            let outcome = self
                .process_block(*block, aggregation.count(block), block_lines, &mut outputs)
                .await;

            match outcome {
                Ok(record) => {
                    let resolved = record.is_valid();
                    report.processed += 1;
                    if !resolved {
                        report.unresolved += 1;
                    }
                    self.logger.record_processed(resolved);
                }
                Err(e) => {
                    outputs.rollback(marks).with_context(|| {
                        format!("Failed to undo partial writes for {}; stopping the run", block)
                    })?;
                    warn!("Failed to process block {}: {:#}", block, e);
                    self.logger.warn(&format!("Block {} left unprocessed: {:#}", block, e));
                    report.failed += 1;
                    self.logger.record_failed();
                }
            }
            self.logger.advance_progress();
        }

        let pending = aggregation.blocks.iter().filter(|block| !outputs.log.is_completed(block)).count();
        if pending == 0 {
            outputs.log.delete()?;
            self.state = RunState::Completed;
            self.logger.finish_progress(&format!("All {} blocks completed", aggregation.len()));
        } else {
            self.logger.finish_progress(&format!(
                "{} blocks still pending; checkpoint kept at {}",
                pending,
                outputs.log.path().display()
            ));
        }

        report.state = self.state;
        Ok(report)
    }

    async fn process_block<F: RowFile>(
        &self,
        block: NetworkBlock,
        count: u64,
        block_lines: &[&String],
        outputs: &mut RunOutputs<F>,
    ) -> Result<AttributionRecord> {
        let sample = block_lines.first().and_then(|line| line_address(line));
        let target = LookupTarget::new(block, sample);

        let record = self
            .resolver
            .resolve_block(&target)
            .await
            .with_context(|| format!("Failed to resolve {}", block))?;

        outputs.write_block(block, &record, count, block_lines)?;
        info!(
            "Block {} -> AS{} {} ({})",
            block,
            record.asn_str(),
            record.holder_str(),
            record.source
        );
        Ok(record)
    }
}

/// Input lines grouped by the block of their second field, in file order
fn index_lines(lines: &[String]) -> BTreeMap<NetworkBlock, Vec<&String>> {
    let mut index: BTreeMap<NetworkBlock, Vec<&String>> = BTreeMap::new();
    for line in lines {
        if let Some(addr) = line_address(line) {
            index.entry(NetworkBlock::from_addr(addr)).or_default().push(line);
        }
    }
    index
}
