use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Free-form Gmail search expression; replaces the `after:` window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
            page_size: default_page_size(),
            max_concurrent_requests: default_max_concurrent(),
            query: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_parent_category")]
    pub parent_category: String,
    #[serde(default = "default_source_label")]
    pub source_label: String,
    #[serde(default = "default_create_parent_labels")]
    pub create_parent_labels: bool,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            parent_category: default_parent_category(),
            source_label: default_source_label(),
            create_parent_labels: default_create_parent_labels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_checkpoint_every_page")]
    pub checkpoint_every_page: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            checkpoint_every_page: default_checkpoint_every_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_period_days() -> u32 {
    365
}

fn default_page_size() -> u32 {
    100
}

fn default_max_concurrent() -> usize {
    10
}

fn default_parent_category() -> String {
    "Subscriptions".to_string()
}

fn default_source_label() -> String {
    "INBOX".to_string()
}

fn default_create_parent_labels() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".gmail-automation/label_dict.json")
}

fn default_checkpoint_every_page() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.period_days == 0 {
            return Err(GmailError::ConfigError(
                "scan.period_days must be at least 1".to_string(),
            ));
        }
        if self.scan.period_days > 3650 {
            return Err(GmailError::ConfigError(
                "scan.period_days cannot exceed 3650 (10 years)".to_string(),
            ));
        }

        // Gmail caps messages.list at 500 results per page
        if self.scan.page_size == 0 {
            return Err(GmailError::ConfigError(
                "scan.page_size must be at least 1".to_string(),
            ));
        }
        if self.scan.page_size > 500 {
            return Err(GmailError::ConfigError(
                "scan.page_size cannot exceed 500".to_string(),
            ));
        }

        if self.scan.max_concurrent_requests == 0 {
            return Err(GmailError::ConfigError(
                "scan.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.scan.max_concurrent_requests > 50 {
            return Err(GmailError::ConfigError(
                "scan.max_concurrent_requests cannot exceed 50 (to stay under Gmail API rate limits of 250 units/sec)".to_string(),
            ));
        }

        if let Some(query) = &self.scan.query {
            if query.trim().is_empty() {
                return Err(GmailError::ConfigError(
                    "scan.query cannot be blank; remove it to use the period window".to_string(),
                ));
            }
        }

        if self.labels.parent_category.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "labels.parent_category cannot be empty".to_string(),
            ));
        }
        if self.labels.parent_category.contains('/') {
            return Err(GmailError::ConfigError(
                "labels.parent_category cannot contain '/' character".to_string(),
            ));
        }
        if self.labels.source_label.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "labels.source_label cannot be empty".to_string(),
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(GmailError::ConfigError(
                "store.path cannot be empty".to_string(),
            ));
        }

        if self.execution.batch_size == 0 {
            return Err(GmailError::ConfigError(
                "execution.batch_size must be at least 1".to_string(),
            ));
        }
        if self.execution.batch_size > 1000 {
            return Err(GmailError::ConfigError(
                "execution.batch_size cannot exceed 1000".to_string(),
            ));
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// The configured query, or the `after:` window for `scan.period_days`
    pub fn effective_query(&self) -> String {
        match &self.scan.query {
            Some(query) => query.clone(),
            None => crate::scanner::default_query(self.scan.period_days),
        }
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
