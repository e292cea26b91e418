//! Environment storage
//!
//! Every environment has a blob store for provider state and published
//! tools. The bootstrap state lives in it under [`STATE_FILE`]; its
//! presence is what marks an environment as bootstrapped.

use crate::error::{CloudError, Result};
use crate::instance::InstanceId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const STATE_FILE: &str = "provider-state";

/// A named blob store
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read an object. Missing objects fail with [`CloudError::NotFound`].
    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()>;

    /// Names of all objects starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// An URL the object can be fetched from.
    async fn url(&self, name: &str) -> Result<String>;

    /// Remove an object; removing a missing object is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Remove every object, and the store itself where that applies.
    async fn remove_all(&self) -> Result<()>;
}

/// Which instances run the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapState {
    #[serde(default)]
    pub state_instances: Vec<InstanceId>,
}

pub async fn save_state(storage: &dyn Storage, state: &BootstrapState) -> Result<()> {
    let content = serde_json::to_vec_pretty(state)?;
    storage.put(STATE_FILE, content).await?;
    tracing::debug!("Saved bootstrap state: {:?}", state.state_instances);
    Ok(())
}

/// Load the bootstrap state, failing with [`CloudError::NotBootstrapped`]
/// when there is none.
pub async fn load_state(storage: &dyn Storage) -> Result<BootstrapState> {
    let content = match storage.get(STATE_FILE).await {
        Ok(content) => content,
        Err(e) if e.is_not_found() => return Err(CloudError::NotBootstrapped),
        Err(e) => return Err(e.context("cannot load bootstrap state")),
    };
    let state: BootstrapState = serde_json::from_slice(&content)?;
    Ok(state)
}

/// Storage backed by a local directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim_start_matches('/');
        if name.is_empty() || name.split('/').any(|part| part == "..") {
            return Err(CloudError::InvalidConfig(format!(
                "invalid storage name {:?}",
                name
            )));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudError::NotFound(format!("file {:?}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        tracing::debug!("Stored {}", path.display());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let name = rel.to_string_lossy().replace('\\', "/");
                    if name.starts_with(prefix) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn url(&self, name: &str) -> Result<String> {
        Ok(format!("file://{}", self.path(name)?.display()))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)?).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    async fn remove_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_list_remove() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("store"));

        storage.put("tools/released.json", b"[]".to_vec()).await.unwrap();
        storage.put("provider-state", b"{}".to_vec()).await.unwrap();

        assert_eq!(storage.get("tools/released.json").await.unwrap(), b"[]");
        assert_eq!(storage.list("").await.unwrap(), vec!["provider-state", "tools/released.json"]);
        assert_eq!(storage.list("tools/").await.unwrap(), vec!["tools/released.json"]);

        storage.remove("provider-state").await.unwrap();
        storage.remove("provider-state").await.unwrap();
        assert!(storage.get("provider-state").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("store"));
        storage.put("a", b"1".to_vec()).await.unwrap();
        storage.remove_all().await.unwrap();
        assert!(storage.list("").await.unwrap().is_empty());
        storage.remove_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        assert!(storage.get("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_state_round_trip() {
        let temp_dir = tempdir().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        assert!(matches!(
            load_state(&storage).await,
            Err(CloudError::NotBootstrapped)
        ));

        let state = BootstrapState {
            state_instances: vec!["i-0".into()],
        };
        save_state(&storage, &state).await.unwrap();
        assert_eq!(load_state(&storage).await.unwrap(), state);

        let raw = String::from_utf8(storage.get(STATE_FILE).await.unwrap()).unwrap();
        assert!(raw.contains("state-instances"));
    }
}
