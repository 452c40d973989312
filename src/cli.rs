use clap::Parser;
use std::path::PathBuf;

use crate::checkpoint::ResumeMode;

#[derive(Parser, Debug)]
#[command(name = "ipattrib")]
#[command(about = "Attribute ASN, holder and country to the /16 blocks of an IPv4 sighting log")]
#[command(version)]
pub struct Cli {
    /// Create default configuration file at ./config/ipattrib.toml
    #[arg(long)]
    pub init: bool,

    /// Log file whose lines carry an IPv4 address in the second field
    #[arg(short, long, default_value = "unique-ips.log")]
    pub input: PathBuf,

    /// Directory for the summary, detailed and checkpoint files
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Configuration file (defaults to ./config/ipattrib.toml, then the built-in defaults)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Re-resolve unresolved rows through DNS after the scan completes
    #[arg(long)]
    pub check_missing: bool,

    /// Offer to resume from an existing checkpoint
    #[arg(long)]
    pub checkpoint: bool,

    /// Resume the most recent checkpoint without prompting
    #[arg(long, conflicts_with = "no_resume")]
    pub resume: bool,

    /// Ignore existing checkpoints and start a new run
    #[arg(long, conflicts_with_all = ["resume", "checkpoint"])]
    pub no_resume: bool,

    /// Delay after every outbound call, in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    pub rate_limit_ms: Option<u64>,

    /// Verbose logging (-v for per-block detail, -vv for per-source diagnostics)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn get_resume_mode(&self) -> ResumeMode {
        if self.resume {
            ResumeMode::AutoResume
        } else if self.no_resume {
            ResumeMode::Fresh
        } else if self.checkpoint {
            ResumeMode::Prompt
        } else {
            ResumeMode::Fresh
        }
    }

    /// tracing filter for the verbosity count
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ipattrib"]);
        assert_eq!(cli.input, PathBuf::from("unique-ips.log"));
        assert_eq!(cli.output_dir, PathBuf::from("."));
        assert!(!cli.check_missing);
        assert_eq!(cli.get_resume_mode(), ResumeMode::Fresh);
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_resume_modes() {
        assert_eq!(Cli::parse_from(["ipattrib", "--checkpoint"]).get_resume_mode(), ResumeMode::Prompt);
        assert_eq!(Cli::parse_from(["ipattrib", "--resume"]).get_resume_mode(), ResumeMode::AutoResume);
        assert_eq!(Cli::parse_from(["ipattrib", "--no-resume"]).get_resume_mode(), ResumeMode::Fresh);
        assert!(Cli::try_parse_from(["ipattrib", "--resume", "--no-resume"]).is_err());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "ipattrib",
            "--input",
            "ips.log",
            "--check-missing",
            "--rate-limit-ms",
            "0",
            "-vv",
        ]);
        assert_eq!(cli.input, PathBuf::from("ips.log"));
        assert!(cli.check_missing);
        assert_eq!(cli.rate_limit_ms, Some(0));
        assert_eq!(cli.log_filter(), "debug");
    }
}
