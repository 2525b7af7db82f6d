use anyhow::Result;
use clap::Parser;
use gmail_sender_labels::cli::{self, Cli, Commands};
use gmail_sender_labels::config::Config;
use gmail_sender_labels::error::GmailError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl MultiProgressMakeWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    // Non-zero exit only when the run aborted before starting
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: sender-labels --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in rustls; pin one crypto provider per platform
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_sender_labels=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_sender_labels=info,warn,error"))
    };

    // Shared MultiProgress so log lines print above the spinners
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter::new(Arc::clone(&multi_progress));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            // Triggers the OAuth flow when no valid token is cached
            let hub = gmail_sender_labels::auth::initialize_gmail_hub(
                &cli.credentials,
                &cli.token_cache,
            )
            .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Scope must match the cached token or a second OAuth flow starts
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(gmail_sender_labels::auth::REQUIRED_SCOPES[0])
                .doit()
                .await
                .map_err(GmailError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Run { dry_run, ref query } => {
            tracing::info!("Starting sender labeling run");
            if dry_run {
                let _ = multi_progress.println("Running in DRY RUN mode - no changes will be made");
            }

            let report =
                cli::run_pipeline(&cli, dry_run, query.clone(), (*multi_progress).clone()).await?;

            println!("\n========================================");
            println!("Sender Labeling Summary");
            println!("========================================");
            println!("Run ID: {}", report.run_id);
            println!("Duration: {} seconds", report.duration_seconds());
            println!("Pages fetched: {}", report.pages_fetched);
            println!("Messages seen: {}", report.messages_seen);
            if report.dry_run {
                println!("Messages to move: {}", report.messages_planned);
                println!("Labels to create: {}", report.planned_new_labels.len());
                for name in &report.planned_new_labels {
                    println!("  - {}", name);
                }
            } else {
                println!("Messages labeled: {}", report.messages_labeled);
                println!("Messages failed: {}", report.messages_failed);
                println!("Labels created: {}", report.labels_created);
                println!("Existing labels reused: {}", report.conflicts_resolved);
            }
            println!("Messages skipped: {}", report.messages_skipped);
            println!("Messages already labeled: {}", report.messages_unchanged);
            if !report.completed {
                println!("Stopped early: a later page could not be listed; rerun to continue.");
            }
            println!("========================================");

            Ok(())
        }

        Commands::Status { detailed } => {
            cli::show_status(&cli, detailed).await?;
            Ok(())
        }

        Commands::InitConfig { ref output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - scan.period_days: How many days of email history to scan");
            println!("  - scan.query: Replace the date window with your own search");
            println!("  - labels.parent_category: Top-level label for all sender labels");
            println!("  - store.path: Where the sender to label mapping is kept");

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {}", cause);
    }

    if let Some(gmail_err) = error.downcast_ref::<GmailError>() {
        match gmail_err {
            GmailError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: sender-labels auth --force");
            }
            GmailError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Wait a few minutes and try again.");
                eprintln!("      Consider reducing max_concurrent_requests in config.");
            }
            GmailError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: sender-labels init-config --force");
            }
            _ => {}
        }
    }
}
