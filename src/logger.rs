use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // No console output at all (tests, piping)
    Summary = 1,   // Progress bar, block results and final summary (default)
    Detailed = 2,  // Per-block warnings and skipped blocks
    Debug = 3,     // Everything, including per-source diagnostics
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

/// Console reporter for a batch run: timestamped messages, a progress bar over
/// blocks, and the end-of-run summary.
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Mutex<Option<ProgressBar>>,
    metadata: Mutex<RunMetadata>,
}

#[derive(Default, Clone)]
struct RunMetadata {
    started: Option<Instant>,
    finished: Option<Instant>,
    blocks_total: usize,
    blocks_processed: usize,
    blocks_skipped: usize,
    blocks_failed: usize,
    blocks_unresolved: usize,
    rows_repaired: usize,
    output_files: Vec<String>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Mutex::new(None),
            metadata: Mutex::new(RunMetadata::default()),
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.verbosity > VerbosityLevel::Silent {
            self.print_message("ERROR", message);
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message);

        // Print above the progress bar when one is active
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }
        eprintln!("{}", msg);
    }

    pub fn start_progress(&self, total_blocks: u64) {
        let pb = if self.verbosity == VerbosityLevel::Silent {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total_blocks);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            pb
        };
        pb.set_message("Starting...");

        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.started = Some(Instant::now());
            metadata.blocks_total = total_blocks as usize;
        }
    }

    pub fn set_progress_message(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
            }
        }
    }

    pub fn advance_progress(&self) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(1);
            }
        }
    }

    pub fn finish_progress(&self, final_message: &str) {
        if let Ok(mut guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.finished = Some(Instant::now());
        }
        self.info(final_message);
    }

    pub fn record_processed(&self, resolved: bool) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.blocks_processed += 1;
            if !resolved {
                metadata.blocks_unresolved += 1;
            }
        }
    }

    pub fn record_skipped(&self) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.blocks_skipped += 1;
        }
    }

    pub fn record_failed(&self) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.blocks_failed += 1;
        }
    }

    pub fn record_repaired(&self, rows: usize) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.rows_repaired += rows;
        }
    }

    pub fn record_output_file(&self, path: &str) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.output_files.push(path.to_string());
        }
    }

    pub fn print_final_summary(&self) {
        if self.verbosity == VerbosityLevel::Silent {
            return;
        }
        let metadata = match self.metadata.lock() {
            Ok(metadata) => metadata.clone(),
            Err(_) => return,
        };

        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== RUN SUMMARY ===");
        if let (Some(start), Some(end)) = (metadata.started, metadata.finished) {
            println!("Duration: {:.2}s", end.duration_since(start).as_secs_f64());
        }
        println!("Blocks: {}", metadata.blocks_total);
        println!("Processed: {}", metadata.blocks_processed);
        println!("Already completed: {}", metadata.blocks_skipped);
        println!("Failed (will retry on resume): {}", metadata.blocks_failed);
        println!("Unresolved: {}", metadata.blocks_unresolved);
        if metadata.rows_repaired > 0 {
            println!("Rows repaired via DNS: {}", metadata.rows_repaired);
        }
        for file in &metadata.output_files {
            println!("Output: {}", file);
        }
        println!("===================\n");

        if metadata.blocks_failed > 0 {
            println!("Run incomplete: {} blocks failed. Resume to retry them.", metadata.blocks_failed);
        } else {
            println!("Run completed.");
        }
    }
}
