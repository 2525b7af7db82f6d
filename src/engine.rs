//! Batch tagging engine: page → classify → resolve → apply

use crate::classifier::classify;
use crate::client::GmailClient;
use crate::config::Config;
use crate::error::Result;
use crate::label_resolver::{LabelPlan, LabelResolver, ResolverStats};
use crate::label_store::LabelStore;
use crate::models::{BatchOperation, MessageDetails, SenderIdentity};
use crate::scanner::{fetch_details, page_stream};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callback invoked on every phase transition
pub type PhaseCallback = Arc<dyn Fn(&EnginePhase, &RunReport) + Send + Sync>;

/// Engine state, recorded in order in [`RunReport::phases`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EnginePhase {
    /// Requesting the page after this continuation token
    Fetching(Option<String>),
    /// Fetching headers for this many messages
    Classifying(usize),
    /// Resolving labels for this many classified messages
    Resolving(usize),
    /// Submitting a batch of this many operations
    Applying(usize),
    Done,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePhase::Fetching(None) => write!(f, "Fetching first page"),
            EnginePhase::Fetching(Some(_)) => write!(f, "Fetching next page"),
            EnginePhase::Classifying(n) => write!(f, "Classifying {} messages", n),
            EnginePhase::Resolving(n) => write!(f, "Resolving labels for {} messages", n),
            EnginePhase::Applying(n) => write!(f, "Applying batch of {} operations", n),
            EnginePhase::Done => write!(f, "Done"),
        }
    }
}

/// Knobs for one run, usually taken from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub page_size: u32,
    pub max_concurrent_requests: usize,
    pub source_label: String,
    pub batch_size: usize,
    pub checkpoint_every_page: bool,
    pub dry_run: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_concurrent_requests: 10,
            source_label: "INBOX".to_string(),
            batch_size: 100,
            checkpoint_every_page: true,
            dry_run: false,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.scan.page_size,
            max_concurrent_requests: config.scan.max_concurrent_requests,
            source_label: config.labels.source_label.clone(),
            batch_size: config.execution.batch_size,
            checkpoint_every_page: config.store.checkpoint_every_page,
            dry_run: config.execution.dry_run,
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub pages_fetched: usize,
    pub messages_seen: usize,
    /// Label operation reported success
    pub messages_labeled: usize,
    /// Label operation reported failure
    pub messages_failed: usize,
    /// Fetch or resolution failed; left as they were
    pub messages_skipped: usize,
    /// Already carried their sender label
    pub messages_unchanged: usize,
    /// Dry run only: messages that would be moved
    pub messages_planned: usize,
    pub batches_submitted: usize,
    pub labels_created: usize,
    pub parent_labels_created: usize,
    pub cache_hits: usize,
    pub conflicts_resolved: usize,
    /// Dry run only: label names that do not exist in the store yet
    pub planned_new_labels: Vec<String>,
    /// True once the engine reached [`EnginePhase::Done`]
    pub completed: bool,
    pub phases: Vec<EnginePhase>,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            dry_run,
            pages_fetched: 0,
            messages_seen: 0,
            messages_labeled: 0,
            messages_failed: 0,
            messages_skipped: 0,
            messages_unchanged: 0,
            messages_planned: 0,
            batches_submitted: 0,
            labels_created: 0,
            parent_labels_created: 0,
            cache_hits: 0,
            conflicts_resolved: 0,
            planned_new_labels: Vec::new(),
            completed: false,
            phases: Vec::new(),
        }
    }

    /// Number of `Fetching` steps taken
    pub fn fetch_steps(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p, EnginePhase::Fetching(_)))
            .count()
    }

    pub fn duration_seconds(&self) -> i64 {
        self.completed_at
            .map(|end| (end - self.started_at).num_seconds())
            .unwrap_or(0)
    }

    fn record_resolver_delta(&mut self, before: ResolverStats, after: ResolverStats) {
        self.labels_created = after.labels_created - before.labels_created;
        self.parent_labels_created = after.parents_created - before.parents_created;
        self.cache_hits = after.cache_hits - before.cache_hits;
        self.conflicts_resolved = after.conflicts_resolved - before.conflicts_resolved;
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Sender Labeling Report\n\n");
        md.push_str(&format!("**Run ID:** {}\n\n", self.run_id));
        md.push_str(&format!(
            "**Started:** {}\n\n",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(completed_at) = self.completed_at {
            md.push_str(&format!(
                "**Completed:** {}\n\n",
                completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        md.push_str(&format!("**Duration:** {}s\n\n", self.duration_seconds()));
        if self.dry_run {
            md.push_str("**Mode:** dry run, no changes were made\n\n");
        }
        if !self.completed {
            md.push_str("**Status:** stopped before the last page\n\n");
        }

        md.push_str("## Summary\n\n");
        md.push_str("| Metric | Count |\n");
        md.push_str("|--------|-------|\n");
        md.push_str(&format!("| Pages fetched | {} |\n", self.pages_fetched));
        md.push_str(&format!("| Messages seen | {} |\n", self.messages_seen));
        if self.dry_run {
            md.push_str(&format!("| Messages to move | {} |\n", self.messages_planned));
        } else {
            md.push_str(&format!("| Messages labeled | {} |\n", self.messages_labeled));
            md.push_str(&format!("| Messages failed | {} |\n", self.messages_failed));
        }
        md.push_str(&format!("| Messages skipped | {} |\n", self.messages_skipped));
        md.push_str(&format!(
            "| Messages already labeled | {} |\n",
            self.messages_unchanged
        ));
        md.push_str(&format!("| Batches submitted | {} |\n", self.batches_submitted));
        md.push_str(&format!("| Labels created | {} |\n", self.labels_created));
        md.push_str(&format!("| Cache hits | {} |\n", self.cache_hits));
        md.push_str(&format!(
            "| Existing labels reused | {} |\n\n",
            self.conflicts_resolved
        ));

        if !self.planned_new_labels.is_empty() {
            md.push_str("## Labels To Create\n\n");
            for name in &self.planned_new_labels {
                md.push_str(&format!("- `{}`\n", name));
            }
            md.push('\n');
        }

        md
    }

    /// Write the markdown report to `path`
    pub async fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_markdown()).await?;
        Ok(())
    }
}

/// Drives the listing page by page and moves each message from the source
/// label into its sender label.
///
/// Each page's batch is submitted and awaited before the next page is
/// requested. Per-message failures are counted, never fatal.
pub struct BatchTaggingEngine {
    client: Arc<dyn GmailClient>,
    resolver: LabelResolver,
    options: EngineOptions,
    on_phase: Option<PhaseCallback>,
}

impl BatchTaggingEngine {
    pub fn new(client: Arc<dyn GmailClient>, resolver: LabelResolver, options: EngineOptions) -> Self {
        Self {
            client,
            resolver,
            options,
            on_phase: None,
        }
    }

    /// Observe phase transitions (progress display)
    pub fn with_phase_callback(mut self, callback: PhaseCallback) -> Self {
        self.on_phase = Some(callback);
        self
    }

    pub fn resolver(&self) -> &LabelResolver {
        &self.resolver
    }

    pub fn into_store(self) -> LabelStore {
        self.resolver.into_store()
    }

    /// Run the full page loop for `query`.
    ///
    /// Returns `Err` only when the first listing call fails, i.e. before any
    /// message was touched. A listing error on a later page stops the loop
    /// and is reported through `completed == false`.
    pub async fn run(&mut self, query: &str) -> Result<RunReport> {
        let mut report = RunReport::new(self.options.dry_run);
        let stats_before = self.resolver.stats();
        let mut planned_new: BTreeSet<String> = BTreeSet::new();

        info!(
            "Starting run {} with query '{}'{}",
            report.run_id,
            query,
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let client = Arc::clone(&self.client);
        let mut pages = page_stream(client.as_ref(), query, self.options.page_size);
        let mut page_token: Option<String> = None;

        loop {
            self.enter(&mut report, EnginePhase::Fetching(page_token.clone()));

            let page = match pages.next().await {
                Some(Ok(page)) => page,
                Some(Err(e)) if report.pages_fetched == 0 => {
                    error!("Failed to list messages: {}", e);
                    return Err(e);
                }
                Some(Err(e)) => {
                    error!(
                        "Failed to list page {}, stopping: {}",
                        report.pages_fetched + 1,
                        e
                    );
                    break;
                }
                None => {
                    report.completed = true;
                    break;
                }
            };
            report.pages_fetched += 1;

            if page.message_ids.is_empty() && report.pages_fetched == 1 {
                info!("No messages found");
                report.completed = true;
                break;
            }

            self.process_page(&page.message_ids, &mut report, &mut planned_new)
                .await;
            self.checkpoint().await;

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    report.completed = true;
                    break;
                }
            }
        }

        if report.completed {
            self.enter(&mut report, EnginePhase::Done);
        }

        report.record_resolver_delta(stats_before, self.resolver.stats());
        report.planned_new_labels = planned_new.into_iter().collect();
        report.completed_at = Some(Utc::now());

        info!(
            "Run {} finished: {} pages, {} messages seen, {} labeled, {} failed, {} skipped, {} unchanged",
            report.run_id,
            report.pages_fetched,
            report.messages_seen,
            report.messages_labeled,
            report.messages_failed,
            report.messages_skipped,
            report.messages_unchanged
        );

        Ok(report)
    }

    /// Flush the label store if it changed.
    ///
    /// Callers treat a failure as a degradation: remote labels already exist
    /// and are re-discovered on the next run.
    pub async fn persist_store(&mut self) -> Result<()> {
        let store = self.resolver.store_mut();
        if store.is_dirty() {
            store.persist().await?;
            info!("Saved {} sender labels to {:?}", store.len(), store.path());
        }
        Ok(())
    }

    async fn checkpoint(&mut self) {
        if !self.options.checkpoint_every_page {
            return;
        }
        if let Err(e) = self.persist_store().await {
            warn!("Failed to checkpoint label store: {}", e);
        }
    }

    fn enter(&self, report: &mut RunReport, phase: EnginePhase) {
        debug!("Phase: {}", phase);
        report.phases.push(phase);
        if let (Some(callback), Some(phase)) = (&self.on_phase, report.phases.last()) {
            callback(phase, report);
        }
    }

    async fn process_page(
        &mut self,
        message_ids: &[String],
        report: &mut RunReport,
        planned_new: &mut BTreeSet<String>,
    ) {
        report.messages_seen += message_ids.len();

        self.enter(report, EnginePhase::Classifying(message_ids.len()));
        let mut classified: Vec<(MessageDetails, SenderIdentity)> =
            Vec::with_capacity(message_ids.len());
        let details = fetch_details(
            self.client.as_ref(),
            message_ids,
            self.options.max_concurrent_requests,
        )
        .await;
        for (id, result) in details {
            match result {
                Ok(details) => {
                    let sender = classify(&details.headers);
                    classified.push((details, sender));
                }
                Err(e) => {
                    warn!("Skipping message {}: {}", id, e);
                    report.messages_skipped += 1;
                }
            }
        }

        self.enter(report, EnginePhase::Resolving(classified.len()));
        let operations = if self.options.dry_run {
            self.plan(classified, report, planned_new);
            Vec::new()
        } else {
            self.resolve_operations(classified, report).await
        };

        if operations.is_empty() {
            debug!("Nothing to apply for this page");
            return;
        }

        let batch_size = self.options.batch_size.max(1);
        for chunk in operations.chunks(batch_size) {
            self.enter(report, EnginePhase::Applying(chunk.len()));
            report.batches_submitted += 1;

            let outcomes = self.client.modify_messages(chunk.to_vec()).await;
            for outcome in outcomes {
                match outcome.result {
                    Ok(()) => {
                        debug!("Message {} labeled", outcome.message_id);
                        report.messages_labeled += 1;
                    }
                    Err(reason) => {
                        warn!("Failed to label message {}: {}", outcome.message_id, reason);
                        report.messages_failed += 1;
                    }
                }
            }
        }
    }

    async fn resolve_operations(
        &mut self,
        classified: Vec<(MessageDetails, SenderIdentity)>,
        report: &mut RunReport,
    ) -> Vec<BatchOperation> {
        let mut operations = Vec::with_capacity(classified.len());

        for (details, sender) in classified {
            let label_id = match self.resolver.resolve(&sender).await {
                Ok(label_id) => label_id,
                Err(e) => {
                    debug!("Skipping message {}: {}", details.id, e);
                    report.messages_skipped += 1;
                    continue;
                }
            };

            if self.already_applied(&details, &label_id) {
                report.messages_unchanged += 1;
                continue;
            }

            operations.push(BatchOperation {
                message_id: details.id,
                add_label_id: label_id,
                remove_label_id: self.options.source_label.clone(),
            });
        }

        operations
    }

    fn plan(
        &self,
        classified: Vec<(MessageDetails, SenderIdentity)>,
        report: &mut RunReport,
        planned_new: &mut BTreeSet<String>,
    ) {
        for (details, sender) in classified {
            match self.resolver.planned_label(&sender) {
                Ok(LabelPlan::Cached(label_id)) if self.already_applied(&details, &label_id) => {
                    report.messages_unchanged += 1;
                }
                Ok(LabelPlan::Cached(label_id)) => {
                    info!("[DRY RUN] Would move message {} to {}", details.id, label_id);
                    report.messages_planned += 1;
                }
                Ok(LabelPlan::Create(name)) => {
                    info!("[DRY RUN] Would move message {} to new label '{}'", details.id, name);
                    planned_new.insert(name);
                    report.messages_planned += 1;
                }
                Err(e) => {
                    debug!("Skipping message {}: {}", details.id, e);
                    report.messages_skipped += 1;
                }
            }
        }
    }

    fn already_applied(&self, details: &MessageDetails, label_id: &str) -> bool {
        details.has_label(label_id) && !details.has_label(&self.options.source_label)
    }
}
