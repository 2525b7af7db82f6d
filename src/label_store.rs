//! Persistent sender → label mapping

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{GmailError, Result};
use crate::models::LabelRecord;

/// Sender address → Gmail label id, loaded once per run and flushed back to
/// a JSON object on disk.
///
/// Entries written by a newer version with non-string values are kept
/// verbatim and written back on [`LabelStore::persist`].
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    passthrough: Map<String, Value>,
    dirty: bool,
}

impl LabelStore {
    /// Create an empty store backed by `path` without touching the filesystem
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            passthrough: Map::new(),
            dirty: false,
        }
    }

    /// Load the mapping from disk.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file
    /// is logged and also yields an empty store; labels are re-discovered
    /// remotely on the next resolution.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path).await {
            Ok(Some(store)) => {
                info!("Loaded {} sender labels from {:?}", store.len(), path);
                store
            }
            Ok(None) => {
                info!("No label store at {:?}, starting empty", path);
                Self::empty(path)
            }
            Err(e) => {
                warn!("Ignoring unreadable label store {:?}: {}", path, e);
                Self::empty(path)
            }
        }
    }

    async fn try_load(path: &Path) -> Result<Option<Self>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let object = match serde_json::from_str::<Value>(&content)? {
            Value::Object(object) => object,
            other => {
                return Err(GmailError::StoreError(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let mut store = Self::empty(path);
        for (key, value) in object {
            match value {
                Value::String(label_id) => {
                    store.entries.insert(key, label_id);
                }
                other => {
                    store.passthrough.insert(key, other);
                }
            }
        }
        Ok(Some(store))
    }

    /// Cached label id for a sender address
    pub fn get(&self, sender_address: &str) -> Option<&str> {
        self.entries.get(sender_address).map(String::as_str)
    }

    /// Insert or overwrite the label id for a sender address
    pub fn put(&mut self, sender_address: impl Into<String>, label_id: impl Into<String>) {
        let sender_address = sender_address.into();
        let label_id = label_id.into();
        self.passthrough.remove(&sender_address);
        if self.entries.get(&sender_address) != Some(&label_id) {
            self.entries.insert(sender_address, label_id);
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the in-memory mapping has changes not yet persisted
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All cached associations, ordered by sender address
    pub fn records(&self) -> impl Iterator<Item = LabelRecord> + '_ {
        self.entries.iter().map(|(sender, label)| LabelRecord {
            sender_address: sender.clone(),
            label_id: label.clone(),
        })
    }

    /// Write the full mapping to disk atomically.
    ///
    /// The JSON is written to a sibling temp file which is then renamed over
    /// the target, so readers never observe a partial file.
    pub async fn persist(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::StoreError(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let mut object = self.passthrough.clone();
        for (sender, label_id) in &self.entries {
            object.insert(sender.clone(), Value::String(label_id.clone()));
        }
        let json = serde_json::to_string_pretty(&Value::Object(object))?;

        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            GmailError::StoreError(format!("Failed to write {:?}: {}", tmp_path, e))
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            GmailError::StoreError(format!("Failed to replace {:?}: {}", self.path, e))
        })?;

        self.dirty = false;
        debug!("Persisted {} sender labels to {:?}", self.len(), self.path);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "label_dict.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
