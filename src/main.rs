use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use ipattrib::cascade::ResolutionCascade;
use ipattrib::checkpoint::{chooser_for, select_run};
use ipattrib::cli::Cli;
use ipattrib::config::{AppConfig, ConfigError};
use ipattrib::driver::{CascadeResolver, CheckpointedBatchDriver};
use ipattrib::enrich::EnrichmentStep;
use ipattrib::logger::{RunLogger, VerbosityLevel};
use ipattrib::rate_limit::RateLimiter;
use ipattrib::repair::MissingAttributionRepair;
use ipattrib::sources::dns::CymruDnsClient;
use ipattrib::subnet::read_log_lines;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize endpoints and rate limits, then run ipattrib again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(delay_ms) = cli.rate_limit_ms {
        config.rate_limit.delay_ms = delay_ms;
    }

    // Everything that can fail on input/output happens before the first write
    let lines = read_log_lines(&cli.input)?;
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create output directory {}", cli.output_dir.display()))?;

    let logger = RunLogger::new(VerbosityLevel::from_verbose_count(cli.verbose));
    logger.info(&format!("Read {} lines from {}", lines.len(), cli.input.display()));

    let chooser = chooser_for(cli.get_resume_mode());
    let (run, resumed) = select_run(&cli.output_dir, &config.output.prefix, chooser.as_ref())?;
    if resumed {
        logger.info(&format!("Resuming run {}", run.timestamp));
    } else {
        logger.info(&format!("Starting new run {}", run.timestamp));
    }

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let dns = Arc::new(CymruDnsClient::from_config(&config.dns, &config.http, limiter.clone())?);
    let cascade = ResolutionCascade::from_config(&config, limiter.clone(), dns.clone())?;
    let enrichment = EnrichmentStep::from_config(&config, limiter.clone())?;
    let resolver = CascadeResolver::new(cascade, enrichment);

    let mut driver = CheckpointedBatchDriver::new(&resolver, &logger);
    let report = driver.run(&run, resumed, &lines).await?;
    logger.record_output_file(&run.summary_path.display().to_string());
    logger.record_output_file(&run.detailed_path.display().to_string());

    if cli.check_missing {
        if report.is_complete() {
            logger.info("Checking unresolved rows via DNS");
            match MissingAttributionRepair::new(dns.as_ref())
                .repair(&run.summary_path, &run.detailed_path)
                .await
            {
                Ok(repair) => {
                    logger.record_repaired(repair.repaired_rows);
                    logger.info(&format!(
                        "Repaired {} of {} unresolved rows ({} summary rows)",
                        repair.repaired_rows, repair.candidates, repair.repaired_summary_rows
                    ));
                }
                // The run's own output is intact; only the repair is lost
                Err(e) => logger.error(&format!("DNS repair failed: {:#}", e)),
            }
        } else {
            warn!("Skipping DNS repair: {} blocks failed in this pass", report.failed);
            logger.warn("Skipping DNS repair until every block has completed; resume the run first");
        }
    }

    info!("{} outbound calls made", limiter.calls());
    logger.print_final_summary();
    Ok(())
}

/// Explicit path, then the standard location, then the built-in defaults
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }
    match AppConfig::load() {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(path)) => {
            info!("No configuration at {}, using built-in defaults", path.display());
            Ok(AppConfig::embedded_default()?)
        }
        Err(e) => Err(e).context("Invalid configuration"),
    }
}
