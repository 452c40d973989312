// checkpoint.rs - Resumable batch runs
//
// A batch run is three files sharing one timestamp: the summary CSV, the
// detailed CSV and a plain-text checkpoint log listing every block whose rows
// have been written. The log is append-only while the run is in progress and
// removed once every block is done.

use anyhow::{Context, Result};
use chrono::Local;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::subnet::NetworkBlock;

/// Timestamp format shared by all files of one run
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const CHECKPOINT_MARKER: &str = "_checkpoint_";
const DETAILED_MARKER: &str = "_detailed_";

/// The summary, detailed and checkpoint paths of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRun {
    pub timestamp: String,
    pub summary_path: PathBuf,
    pub detailed_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl BatchRun {
    pub fn new(dir: &Path, prefix: &str, timestamp: &str) -> Self {
        Self {
            timestamp: timestamp.to_string(),
            summary_path: dir.join(format!("{}_{}.csv", prefix, timestamp)),
            detailed_path: dir.join(format!("{}{}{}.csv", prefix, DETAILED_MARKER, timestamp)),
            checkpoint_path: dir.join(format!("{}{}{}.txt", prefix, CHECKPOINT_MARKER, timestamp)),
        }
    }

    /// A new run stamped with the current local time
    pub fn create(dir: &Path, prefix: &str) -> Self {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::new(dir, prefix, &timestamp)
    }

    /// Rebuild a run from its checkpoint log's file name
    pub fn from_checkpoint_path(path: &Path, prefix: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let timestamp = name
            .strip_prefix(prefix)?
            .strip_prefix(CHECKPOINT_MARKER)?
            .strip_suffix(".txt")?;
        if timestamp.is_empty() {
            return None;
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Some(Self::new(dir, prefix, timestamp))
    }

    /// Every checkpoint log in `dir`, newest first
    pub fn discover(dir: &Path, prefix: &str) -> Result<Vec<Self>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list checkpoints in {}", dir.display()))?;

        let mut runs: Vec<Self> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| Self::from_checkpoint_path(&path, prefix))
            .collect();

        // Timestamps sort lexically in chronological order
        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!("Discovered {} checkpoint(s) in {}", runs.len(), dir.display());
        Ok(runs)
    }

    /// The run's files that currently exist on disk
    pub fn related_files(&self) -> Vec<&Path> {
        [&self.summary_path, &self.detailed_path, &self.checkpoint_path]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|path| path.exists())
            .collect()
    }

    pub fn summary(&self) -> Result<CheckpointSummary> {
        let completed = CheckpointLog::read_completed(&self.checkpoint_path)?;
        Ok(CheckpointSummary {
            timestamp: self.timestamp.clone(),
            completed_count: completed.len(),
            related_files: self
                .related_files()
                .into_iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
        })
    }
}

/// Durable set of completed blocks for one run
#[derive(Debug)]
pub struct CheckpointLog {
    path: PathBuf,
    completed: BTreeSet<NetworkBlock>,
    file: File,
}

impl CheckpointLog {
    /// Open (or create) the log, loading any blocks already recorded
    pub fn open(path: &Path) -> Result<Self> {
        let completed = Self::read_completed(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open checkpoint log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            completed,
            file,
        })
    }

    /// Start an empty log, discarding any entries left at the same path
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to create checkpoint log {}", path.display()))?;
        file.set_len(0)
            .with_context(|| format!("Failed to truncate checkpoint log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            completed: BTreeSet::new(),
            file,
        })
    }

    /// Blocks recorded in a log file. A missing file is an empty log; lines that
    /// are not a block (e.g. a torn final write) are ignored.
    pub fn read_completed(path: &Path) -> Result<BTreeSet<NetworkBlock>> {
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        let file = File::open(path)
            .with_context(|| format!("Failed to read checkpoint log {}", path.display()))?;

        let mut completed = BTreeSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<NetworkBlock>() {
                Ok(block) => {
                    completed.insert(block);
                }
                Err(_) => warn!("Ignoring unreadable checkpoint entry {:?}", trimmed),
            }
        }
        Ok(completed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_completed(&self, block: &NetworkBlock) -> bool {
        self.completed.contains(block)
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Append a block and sync it to disk before it counts as done
    pub fn mark_completed(&mut self, block: NetworkBlock) -> Result<()> {
        if self.completed.contains(&block) {
            return Ok(());
        }
        writeln!(self.file, "{}", block)?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.completed.insert(block);
        Ok(())
    }

    pub fn byte_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Cut the log back to `len` bytes, dropping an entry whose write did not finish
    pub fn rollback_to(&mut self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("Failed to roll back checkpoint log {}", self.path.display()))
    }

    /// Remove the log (called once the run is complete)
    pub fn delete(self) -> Result<()> {
        let path = self.path;
        drop(self.file);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete checkpoint log {}", path.display()))?;
        }
        Ok(())
    }
}

/// Summary of checkpoint state for display
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub timestamp: String,
    pub completed_count: usize,
    pub related_files: Vec<String>,
}

impl std::fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run {} - {} blocks completed ({})",
            self.timestamp,
            self.completed_count,
            self.related_files.join(", ")
        )
    }
}

/// Resume mode options
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ResumeMode {
    /// Offer discovered checkpoints to the operator
    #[default]
    Prompt,
    /// Resume the most recent checkpoint if one exists
    AutoResume,
    /// Start fresh, ignore any existing checkpoint
    Fresh,
}

/// Picks which discovered run (if any) to resume
pub trait ResumeChooser {
    /// `candidates` is ordered newest first. `None` means start fresh.
    fn choose(&self, candidates: &[BatchRun]) -> Result<Option<BatchRun>>;
}

/// Always resumes the newest checkpoint
pub struct MostRecentChooser;

impl ResumeChooser for MostRecentChooser {
    fn choose(&self, candidates: &[BatchRun]) -> Result<Option<BatchRun>> {
        Ok(candidates.first().cloned())
    }
}

/// Never resumes
pub struct FreshChooser;

impl ResumeChooser for FreshChooser {
    fn choose(&self, _candidates: &[BatchRun]) -> Result<Option<BatchRun>> {
        Ok(None)
    }
}

/// Lists checkpoints on stdout and reads the operator's choice from stdin
pub struct PromptChooser;

impl ResumeChooser for PromptChooser {
    fn choose(&self, candidates: &[BatchRun]) -> Result<Option<BatchRun>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        println!("\nAvailable checkpoints:");
        for (i, run) in candidates.iter().enumerate() {
            match run.summary() {
                Ok(summary) => println!("  {}. {}", i + 1, summary),
                Err(_) => println!("  {}. Run {}", i + 1, run.timestamp),
            }
        }
        println!("  0. Start fresh");

        let stdin = std::io::stdin();
        loop {
            print!("Select checkpoint to resume (0-{}): ", candidates.len());
            std::io::stdout().flush()?;

            let mut input = String::new();
            if stdin.lock().read_line(&mut input)? == 0 {
                // EOF: nobody is answering
                return Ok(None);
            }
            match parse_selection(&input, candidates.len()) {
                Some(0) => return Ok(None),
                Some(n) => return Ok(candidates.get(n - 1).cloned()),
                None => println!("Please enter a number between 0 and {}", candidates.len()),
            }
        }
    }
}

/// Parse a menu answer; 0 is "fresh", 1..=count selects a checkpoint
pub fn parse_selection(input: &str, count: usize) -> Option<usize> {
    let choice: usize = input.trim().parse().ok()?;
    (choice <= count).then_some(choice)
}

/// The chooser for a resume mode. Prompting degrades to the most recent
/// checkpoint when stdin is not a terminal.
pub fn chooser_for(mode: ResumeMode) -> Box<dyn ResumeChooser> {
    match mode {
        ResumeMode::Fresh => Box::new(FreshChooser),
        ResumeMode::AutoResume => Box::new(MostRecentChooser),
        ResumeMode::Prompt if std::io::stdin().is_terminal() => Box::new(PromptChooser),
        ResumeMode::Prompt => Box::new(MostRecentChooser),
    }
}

/// Pick the run to work on: a resumed one, or a new one. The flag is true when resuming.
pub fn select_run(dir: &Path, prefix: &str, chooser: &dyn ResumeChooser) -> Result<(BatchRun, bool)> {
    let candidates = BatchRun::discover(dir, prefix)?;
    match chooser.choose(&candidates)? {
        Some(run) => Ok((run, true)),
        None => Ok((BatchRun::create(dir, prefix), false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PREFIX: &str = "ripe_ris_data_full";

    fn block(s: &str) -> NetworkBlock {
        s.parse().unwrap()
    }

    #[test]
    fn test_run_file_names() {
        let run = BatchRun::new(Path::new("/out"), PREFIX, "20240501_101500");
        assert_eq!(run.summary_path, Path::new("/out/ripe_ris_data_full_20240501_101500.csv"));
        assert_eq!(
            run.detailed_path,
            Path::new("/out/ripe_ris_data_full_detailed_20240501_101500.csv")
        );
        assert_eq!(
            run.checkpoint_path,
            Path::new("/out/ripe_ris_data_full_checkpoint_20240501_101500.txt")
        );
    }

    #[test]
    fn test_from_checkpoint_path() {
        let path = Path::new("/out/ripe_ris_data_full_checkpoint_20240501_101500.txt");
        let run = BatchRun::from_checkpoint_path(path, PREFIX).unwrap();
        assert_eq!(run.timestamp, "20240501_101500");
        assert_eq!(run, BatchRun::new(Path::new("/out"), PREFIX, "20240501_101500"));

        assert!(BatchRun::from_checkpoint_path(Path::new("/out/ripe_ris_data_full_20240501.csv"), PREFIX).is_none());
        assert!(BatchRun::from_checkpoint_path(Path::new("/out/other_checkpoint_1.txt"), PREFIX).is_none());
    }

    #[test]
    fn test_discover_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for ts in ["20240101_000000", "20240301_000000", "20240201_000000"] {
            std::fs::write(BatchRun::new(dir, PREFIX, ts).checkpoint_path, "").unwrap();
        }
        std::fs::write(dir.join("unrelated.txt"), "").unwrap();

        let runs = BatchRun::discover(dir, PREFIX).unwrap();
        let stamps: Vec<&str> = runs.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(stamps, vec!["20240301_000000", "20240201_000000", "20240101_000000"]);
    }

    #[test]
    fn test_related_files_only_lists_existing() {
        let temp_dir = TempDir::new().unwrap();
        let run = BatchRun::new(temp_dir.path(), PREFIX, "20240501_101500");
        std::fs::write(&run.checkpoint_path, "10.1.0.0/16\n").unwrap();
        std::fs::write(&run.summary_path, "subnet,asn,asn_desc,country,count\n").unwrap();

        let files = run.related_files();
        assert_eq!(files.len(), 2);
        assert!(!files.contains(&run.detailed_path.as_path()));

        let summary = run.summary().unwrap();
        assert_eq!(summary.completed_count, 1);
        assert!(summary.to_string().contains("20240501_101500"));
    }

    #[test]
    fn test_log_append_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.txt");

        let mut log = CheckpointLog::open(&path).unwrap();
        assert!(log.is_empty());
        log.mark_completed(block("10.1.0.0/16")).unwrap();
        log.mark_completed(block("10.2.0.0/16")).unwrap();
        log.mark_completed(block("10.1.0.0/16")).unwrap();
        drop(log);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.1.0.0/16\n10.2.0.0/16\n");

        let reopened = CheckpointLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.is_completed(&block("10.2.0.0/16")));
        assert!(!reopened.is_completed(&block("10.3.0.0/16")));
    }

    #[test]
    fn test_torn_line_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.txt");
        std::fs::write(&path, "10.1.0.0/16\n10.2.0.0/1").unwrap();

        let completed = CheckpointLog::read_completed(&path).unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed.contains(&block("10.1.0.0/16")));
    }

    #[test]
    fn test_create_discards_stale_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.txt");
        std::fs::write(&path, "10.1.0.0/16\n").unwrap();

        let mut log = CheckpointLog::create(&path).unwrap();
        assert!(log.is_empty());
        assert!(!log.is_completed(&block("10.1.0.0/16")));
        log.mark_completed(block("10.2.0.0/16")).unwrap();
        drop(log);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.2.0.0/16\n");
    }

    #[test]
    fn test_rollback_drops_partial_entry() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.txt");

        let mut log = CheckpointLog::create(&path).unwrap();
        log.mark_completed(block("10.1.0.0/16")).unwrap();
        let mark = log.byte_len().unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"10.2.0")
            .unwrap();

        log.rollback_to(mark).unwrap();
        log.mark_completed(block("10.3.0.0/16")).unwrap();
        drop(log);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.1.0.0/16\n10.3.0.0/16\n");
    }

    #[test]
    fn test_log_delete() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.txt");

        let mut log = CheckpointLog::open(&path).unwrap();
        log.mark_completed(block("10.1.0.0/16")).unwrap();
        assert!(path.exists());

        log.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_choosers() {
        let runs = vec![
            BatchRun::new(Path::new("."), PREFIX, "20240301_000000"),
            BatchRun::new(Path::new("."), PREFIX, "20240101_000000"),
        ];
        assert_eq!(MostRecentChooser.choose(&runs).unwrap(), Some(runs[0].clone()));
        assert_eq!(MostRecentChooser.choose(&[]).unwrap(), None);
        assert_eq!(FreshChooser.choose(&runs).unwrap(), None);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("0\n", 2), Some(0));
        assert_eq!(parse_selection(" 2 ", 2), Some(2));
        assert_eq!(parse_selection("3", 2), None);
        assert_eq!(parse_selection("abc", 2), None);
    }

    #[test]
    fn test_select_run() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let (fresh, resumed) = select_run(dir, PREFIX, &MostRecentChooser).unwrap();
        assert!(!resumed);
        assert_eq!(fresh.checkpoint_path.parent(), Some(dir));

        let existing = BatchRun::new(dir, PREFIX, "20200101_000000");
        std::fs::write(&existing.checkpoint_path, "").unwrap();
        let (run, resumed) = select_run(dir, PREFIX, &MostRecentChooser).unwrap();
        assert!(resumed);
        assert_eq!(run, existing);

        let (_, resumed) = select_run(dir, PREFIX, &FreshChooser).unwrap();
        assert!(!resumed);
    }

    #[test]
    fn test_default_resume_mode() {
        assert_eq!(ResumeMode::default(), ResumeMode::Prompt);
    }
}
