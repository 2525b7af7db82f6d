//! Gmail Sender Labels
//!
//! Moves inbox mail into one Gmail label per sender, named
//! `<Parent>/<Display Name>/<domain>`, and remembers the sender → label
//! mapping between runs so labels are only created once.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 installed-app flow with token caching
//! - **Scanning**: Lazy page-by-page listing with ordered header fetches
//! - **Classification**: Sender identity from the `From` header
//! - **Label Resolution**: Create-or-reuse with conflict fallback
//! - **Label Store**: Atomic JSON persistence of the sender mapping
//! - **Engine**: Bounded per-page batches that move messages out of the inbox
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_sender_labels::{auth, config::Config};
//! use gmail_sender_labels::{
//!     BatchTaggingEngine, EngineOptions, GmailClient, LabelResolver, LabelStore,
//!     ProductionGmailClient,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-automation/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client: Arc<dyn GmailClient> = Arc::new(ProductionGmailClient::new(
//!         hub,
//!         config.scan.max_concurrent_requests,
//!     ));
//!
//!     let store = LabelStore::load(&config.store.path).await;
//!     let resolver = LabelResolver::new(Arc::clone(&client), store, "Subscriptions");
//!     let mut engine =
//!         BatchTaggingEngine::new(client, resolver, EngineOptions::from_config(&config));
//!
//!     let report = engine.run(&config.effective_query()).await?;
//!     engine.persist_store().await?;
//!     println!("Labeled {} messages", report.messages_labeled);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API trait and rate-limited production client
//! - [`classifier`] - Sender extraction from message headers
//! - [`cli`] - Command-line interface and pipeline orchestration
//! - [`config`] - Configuration management
//! - [`engine`] - Page/classify/resolve/apply state machine
//! - [`error`] - Error types and result aliases
//! - [`label_resolver`] - Sender label naming and creation
//! - [`label_store`] - Persistent sender → label mapping
//! - [`models`] - Core data structures
//! - [`scanner`] - Message listing stream and detail fetching

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod label_resolver;
pub mod label_store;
pub mod models;
pub mod scanner;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

// Core data models
pub use models::{
    BatchOperation, LabelInfo, LabelRecord, MessageDetails, MessageHeader, MessagePage,
    OperationOutcome, SenderIdentity,
};

pub use classifier::classify;

pub use config::{Config, ExecutionConfig, LabelConfig, ScanConfig, StoreConfig};

pub use client::{GmailClient, ProductionGmailClient};

pub use engine::{BatchTaggingEngine, EngineOptions, EnginePhase, RunReport};
pub use label_resolver::{LabelPlan, LabelResolver, ResolverStats};
pub use label_store::LabelStore;

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
