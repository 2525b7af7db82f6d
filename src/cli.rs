//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::auth;
use crate::client::{GmailClient, ProductionGmailClient};
use crate::config::Config;
use crate::engine::{BatchTaggingEngine, EngineOptions, EnginePhase, PhaseCallback, RunReport};
use crate::error::Result;
use crate::label_resolver::LabelResolver;
use crate::label_store::LabelStore;

#[derive(Parser, Debug)]
#[command(name = "sender-labels")]
#[command(version = "0.1.0")]
#[command(about = "Move inbox mail into per-sender Gmail labels", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-automation/token.json")]
    pub token_cache: PathBuf,

    /// Path to the sender label store (overrides store.path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Label store location: `--store` wins over the config file
    pub fn store_path(&self, config: &Config) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| config.store.path.clone())
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Label messages by sender and move them out of the inbox
    Run {
        /// Dry run mode (don't make any changes)
        #[arg(long)]
        dry_run: bool,

        /// Gmail search expression (default: messages from the last scan.period_days)
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show the sender label store
    Status {
        /// List every cached sender
        #[arg(long)]
        detailed: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the tracing writer so log lines print
    /// above the spinners
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        // Use {elapsed} for human-readable format (e.g., "1s", "234ms")
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Load config, authenticate, and run the labeling engine once.
///
/// Errors returned here mean the run never started: config, auth, or the
/// first listing call failed. A label store that cannot be saved is logged
/// and does not fail the run.
pub async fn run_pipeline(
    cli: &Cli,
    dry_run: bool,
    query: Option<String>,
    multi: MultiProgress,
) -> Result<RunReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    if dry_run {
        config.execution.dry_run = true;
    }
    if let Some(query) = query {
        config.scan.query = Some(query);
        config.validate()?;
    }
    reporter.finish_spinner(
        &config_spinner,
        &format!("Configuration loaded from {:?}", cli.config),
    );

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated successfully");

    let client: Arc<dyn GmailClient> = Arc::new(
        ProductionGmailClient::new(hub, config.scan.max_concurrent_requests)
            .with_max_retries(config.execution.max_retries),
    );

    let store_path = cli.store_path(&config);
    let store = LabelStore::load(&store_path).await;
    let resolver = LabelResolver::new(
        Arc::clone(&client),
        store,
        config.labels.parent_category.clone(),
    )
    .with_parent_labels(config.labels.create_parent_labels);

    let run_spinner = reporter.add_spinner("Labeling messages...");
    let progress = run_spinner.clone();
    let on_phase: PhaseCallback = Arc::new(move |phase: &EnginePhase, report: &RunReport| {
        progress.set_message(format!(
            "{} (page {}, {} labeled)",
            phase, report.pages_fetched, report.messages_labeled
        ));
    });

    let mut engine =
        BatchTaggingEngine::new(client, resolver, EngineOptions::from_config(&config))
            .with_phase_callback(on_phase);

    let query = config.effective_query();
    info!("Scanning messages with query: {}", query);
    let result = engine.run(&query).await;
    run_spinner.finish_and_clear();
    let report = result?;

    if let Err(e) = engine.persist_store().await {
        error!(
            "Failed to save label store to {:?}: {}. New labels will be re-discovered next run.",
            store_path,
            e
        );
    }

    reporter.finish_spinner(
        &run_spinner,
        &format!(
            "Processed {} messages across {} pages",
            report.messages_seen, report.pages_fetched
        ),
    );

    let report_path = store_path.with_file_name(format!("report-{}.md", report.run_id));
    match report.save(&report_path).await {
        Ok(()) => info!("Report saved to {:?}", report_path),
        Err(e) => warn!("Failed to save report to {:?}: {}", report_path, e),
    }

    Ok(report)
}

/// Print the contents of the label store
pub async fn show_status(cli: &Cli, detailed: bool) -> Result<()> {
    let config = Config::load(&cli.config).await?;
    let store_path = cli.store_path(&config);

    if !store_path.exists() {
        println!("No label store found.");
        println!("Store file: {:?}", store_path);
        return Ok(());
    }

    let store = LabelStore::load(&store_path).await;

    println!("\n========================================");
    println!("Sender Label Store");
    println!("========================================");
    println!("Store file: {:?}", store_path);
    println!("Cached senders: {}", store.len());

    if detailed && !store.is_empty() {
        println!("\n--- Senders ---");
        for record in store.records() {
            println!("  {} -> {}", record.sender_address, record.label_id);
        }
    }
    println!("========================================");

    Ok(())
}
