//! Metadata data sources
//!
//! Tools and image metadata are published as JSON documents under a base
//! location, one per stream:
//!
//! ```text
//! <base>/tools/<stream>.json    [{"version": "1.2.3-trusty-amd64", "url": ...}, ...]
//! <base>/images/<stream>.json   [{"id": "...", "arch": "amd64", "version": "14.04", ...}, ...]
//! ```
//!
//! Tools URLs relative to the document are resolved against the base.
//! A missing document means the source has nothing for that stream.

use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use corral_cloud::Storage;
use corral_core::{ImageMetadata, Tools, ToolsList};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const TOOLS_PATH: &str = "tools";
pub const IMAGES_PATH: &str = "images";

/// A location publishing tools and image metadata
#[async_trait]
pub trait DataSource: Send + Sync {
    fn description(&self) -> String;

    async fn fetch_tools(&self, stream: &str) -> Result<ToolsList>;

    async fn fetch_images(&self, stream: &str) -> Result<Vec<ImageMetadata>>;
}

fn document_name(kind: &str, stream: &str) -> String {
    format!("{}/{}.json", kind, stream)
}

fn resolve_url(base: &str, url: &str) -> String {
    if url.is_empty() || url.contains("://") {
        return url.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
}

fn parse_tools(content: &[u8], base: &str, what: &str) -> Result<ToolsList> {
    let list: Vec<Tools> =
        serde_json::from_slice(content).map_err(|e| BootstrapError::metadata(format!("cannot read {}", what), e))?;
    Ok(list
        .into_iter()
        .map(|mut t| {
            t.url = resolve_url(base, &t.url);
            t
        })
        .collect())
}

fn parse_images(content: &[u8], what: &str) -> Result<Vec<ImageMetadata>> {
    serde_json::from_slice(content).map_err(|e| BootstrapError::metadata(format!("cannot read {}", what), e))
}

/// Metadata in a local directory
#[derive(Debug, Clone)]
pub struct DirDataSource {
    root: PathBuf,
}

impl DirDataSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BootstrapError::metadata(format!("cannot read {}", path.display()), e)),
        }
    }

    /// Every image record in the directory, whatever its stream
    pub async fn all_images(&self) -> Result<Vec<ImageMetadata>> {
        let dir = self.root.join(IMAGES_PATH);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BootstrapError::metadata("cannot access image metadata", e)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut images = Vec::new();
        for path in paths {
            let content = tokio::fs::read(&path).await?;
            images.extend(parse_images(&content, &path.display().to_string())?);
        }
        Ok(images)
    }
}

#[async_trait]
impl DataSource for DirDataSource {
    fn description(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn fetch_tools(&self, stream: &str) -> Result<ToolsList> {
        let name = document_name(TOOLS_PATH, stream);
        match self.read(&name).await? {
            Some(content) => {
                let base = format!("file://{}/{}", self.root.display(), TOOLS_PATH);
                parse_tools(&content, &base, &name)
            }
            None => Ok(ToolsList::default()),
        }
    }

    async fn fetch_images(&self, stream: &str) -> Result<Vec<ImageMetadata>> {
        let name = document_name(IMAGES_PATH, stream);
        match self.read(&name).await? {
            Some(content) => parse_images(&content, &name),
            None => Ok(Vec::new()),
        }
    }
}

/// Metadata published over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url(name);
        tracing::debug!("Fetching metadata: {}", url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BootstrapError::metadata(format!("GET {}", url), e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BootstrapError::metadata(format!("GET {}", url), resp.status()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| BootstrapError::metadata(format!("GET {}", url), e))?;
        Ok(Some(body.to_vec()))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn description(&self) -> String {
        self.base_url.clone()
    }

    async fn fetch_tools(&self, stream: &str) -> Result<ToolsList> {
        let name = document_name(TOOLS_PATH, stream);
        match self.get(&name).await? {
            Some(content) => parse_tools(&content, &self.url(TOOLS_PATH), &name),
            None => Ok(ToolsList::default()),
        }
    }

    async fn fetch_images(&self, stream: &str) -> Result<Vec<ImageMetadata>> {
        let name = document_name(IMAGES_PATH, stream);
        match self.get(&name).await? {
            Some(content) => parse_images(&content, &name),
            None => Ok(Vec::new()),
        }
    }
}

/// Metadata kept in an environment's storage
pub struct StorageDataSource {
    description: String,
    storage: Arc<dyn Storage>,
}

impl StorageDataSource {
    pub fn new(description: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            description: description.into(),
            storage,
        }
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.storage.get(name).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DataSource for StorageDataSource {
    fn description(&self) -> String {
        self.description.clone()
    }

    async fn fetch_tools(&self, stream: &str) -> Result<ToolsList> {
        let name = document_name(TOOLS_PATH, stream);
        match self.get(&name).await? {
            Some(content) => {
                let base = self.storage.url(TOOLS_PATH).await?;
                parse_tools(&content, &base, &name)
            }
            None => Ok(ToolsList::default()),
        }
    }

    async fn fetch_images(&self, stream: &str) -> Result<Vec<ImageMetadata>> {
        let name = document_name(IMAGES_PATH, stream);
        match self.get(&name).await? {
            Some(content) => parse_images(&content, &name),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_cloud::FileStorage;
    use std::fs;
    use tempfile::tempdir;

    const TOOLS_JSON: &str = r#"[
        {"version": "1.2.3-trusty-amd64", "url": "corral-1.2.3-trusty-amd64.tgz", "size": 10, "sha256": "abc"},
        {"version": "1.2.3-trusty-arm64", "url": "https://tools.example.com/arm64.tgz"}
    ]"#;

    const IMAGES_JSON: &str = r#"[
        {"id": "img-1", "arch": "amd64", "version": "14.04", "region-name": "region-a"}
    ]"#;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("file:///m/tools", "a.tgz"), "file:///m/tools/a.tgz");
        assert_eq!(
            resolve_url("file:///m/tools/", "https://x/a.tgz"),
            "https://x/a.tgz"
        );
        assert_eq!(resolve_url("file:///m/tools", ""), "");
    }

    #[tokio::test]
    async fn test_dir_source() {
        let temp_dir = tempdir().unwrap();
        write(temp_dir.path(), "tools/released.json", TOOLS_JSON);
        write(temp_dir.path(), "images/released.json", IMAGES_JSON);
        let source = DirDataSource::new(temp_dir.path());

        let tools = source.fetch_tools("released").await.unwrap();
        assert_eq!(tools.len(), 2);
        let first = tools.first().unwrap();
        assert_eq!(first.version.to_string(), "1.2.3-trusty-amd64");
        assert_eq!(
            first.url,
            format!("file://{}/tools/corral-1.2.3-trusty-amd64.tgz", temp_dir.path().display())
        );
        assert_eq!(first.sha256, "abc");

        let images = source.fetch_images("released").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].region_name, "region-a");
    }

    #[tokio::test]
    async fn test_dir_source_missing_stream() {
        let temp_dir = tempdir().unwrap();
        let source = DirDataSource::new(temp_dir.path());
        assert!(source.fetch_tools("devel").await.unwrap().is_empty());
        assert!(source.fetch_images("devel").await.unwrap().is_empty());
        assert!(source.all_images().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dir_source_all_images() {
        let temp_dir = tempdir().unwrap();
        write(temp_dir.path(), "images/released.json", IMAGES_JSON);
        write(
            temp_dir.path(),
            "images/daily.json",
            r#"[{"id": "img-2", "arch": "arm64", "version": "16.04", "stream": "daily"}]"#,
        );
        write(temp_dir.path(), "images/README", "not metadata");
        let images = DirDataSource::new(temp_dir.path()).all_images().await.unwrap();
        let ids: Vec<&str> = images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["img-2", "img-1"]);
    }

    #[tokio::test]
    async fn test_dir_source_malformed() {
        let temp_dir = tempdir().unwrap();
        write(temp_dir.path(), "tools/released.json", "{not json");
        let err = DirDataSource::new(temp_dir.path())
            .fetch_tools("released")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read tools/released.json"));
    }

    #[tokio::test]
    async fn test_storage_source() {
        let temp_dir = tempdir().unwrap();
        write(temp_dir.path(), "tools/released.json", TOOLS_JSON);
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(temp_dir.path()));
        let source = StorageDataSource::new("environment storage", storage);

        let tools = source.fetch_tools("released").await.unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools.first().unwrap().url.ends_with("/tools/corral-1.2.3-trusty-amd64.tgz"));
        assert!(source.fetch_images("released").await.unwrap().is_empty());
    }

    #[test]
    fn test_http_source_urls() {
        let source = HttpDataSource::new("https://streams.example.com/corral/");
        assert_eq!(source.base_url(), "https://streams.example.com/corral");
        assert_eq!(
            source.url(&document_name(TOOLS_PATH, "released")),
            "https://streams.example.com/corral/tools/released.json"
        );
    }
}
