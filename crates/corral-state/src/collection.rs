//! The status document collection
//!
//! Every status document lives in one JSON file, keyed by the owning
//! entity's global key qualified with the environment UUID:
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2026-01-01T00:00:00Z",
//!   "statuses": {
//!     "<env-uuid>:m#0": {"env-uuid": "...", "status": "pending", "status-info": "", ...}
//!   }
//! }
//! ```

use crate::error::{Result, StateError};
use chrono::{DateTime, Utc};
use corral_core::{Status, StatusData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const FILE_VERSION: u32 = 1;

/// A persisted status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusDoc {
    pub env_uuid: String,
    pub status: Status,
    #[serde(default)]
    pub status_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_data: Option<StatusData>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusFile {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    statuses: BTreeMap<String, StatusDoc>,
}

impl Default for StatusFile {
    fn default() -> Self {
        Self {
            version: FILE_VERSION,
            updated_at: Utc::now(),
            statuses: BTreeMap::new(),
        }
    }
}

/// Status documents for one environment, stored in a JSON file
#[derive(Debug)]
pub struct StatusCollection {
    path: PathBuf,
    env_uuid: String,
    lock: Mutex<()>,
}

impl StatusCollection {
    pub fn new(path: impl AsRef<Path>, env_uuid: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            env_uuid: env_uuid.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn env_uuid(&self) -> &str {
        &self.env_uuid
    }

    fn doc_id(&self, global_key: &str) -> String {
        format!("{}:{}", self.env_uuid, global_key)
    }

    /// A document for this environment, stamped now
    pub fn doc(&self, status: Status, info: impl Into<String>, data: Option<StatusData>) -> StatusDoc {
        StatusDoc {
            env_uuid: self.env_uuid.clone(),
            status,
            status_info: info.into(),
            status_data: data,
            updated: Utc::now(),
        }
    }

    async fn load(&self) -> Result<StatusFile> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StatusFile::default()),
            Err(e) => return Err(e.into()),
        };
        let file: StatusFile = serde_json::from_slice(&content)?;
        if file.version > FILE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: file.version,
                supported: FILE_VERSION,
            });
        }
        Ok(file)
    }

    async fn save(&self, mut file: StatusFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        file.updated_at = Utc::now();
        let content = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Insert a document; one must not exist yet.
    pub async fn create(&self, global_key: &str, doc: StatusDoc) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let id = self.doc_id(global_key);
        if file.statuses.contains_key(&id) {
            return Err(StateError::AlreadyExists(global_key.to_string()));
        }
        tracing::debug!("Creating status {}: {}", global_key, doc.status);
        file.statuses.insert(id, doc);
        self.save(file).await
    }

    /// Replace a document; it must exist.
    pub async fn update(&self, global_key: &str, doc: StatusDoc) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let slot = file
            .statuses
            .get_mut(&self.doc_id(global_key))
            .ok_or_else(|| StateError::NotFound(global_key.to_string()))?;
        tracing::debug!("Setting status {}: {}", global_key, doc.status);
        *slot = doc;
        self.save(file).await
    }

    pub async fn get(&self, global_key: &str) -> Result<StatusDoc> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.statuses
            .remove(&self.doc_id(global_key))
            .ok_or_else(|| StateError::NotFound(global_key.to_string()))
    }

    /// Delete a document; deleting a missing one is not an error.
    pub async fn remove(&self, global_key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        if file.statuses.remove(&self.doc_id(global_key)).is_some() {
            tracing::debug!("Removed status {}", global_key);
            self.save(file).await?;
        }
        Ok(())
    }

    /// Global keys with a document in this environment, sorted
    pub async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let file = self.load().await?;
        let prefix = format!("{}:", self.env_uuid);
        Ok(file
            .statuses
            .keys()
            .filter_map(|id| id.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
