//! Swift-backed environment storage

use crate::api::OpenStackApi;
use async_trait::async_trait;
use corral_cloud::{CloudError, Result, Storage};
use std::sync::Arc;

/// The environment's private container, named by `control-bucket`
#[derive(Clone)]
pub struct SwiftStorage {
    api: Arc<dyn OpenStackApi>,
    container: String,
}

impl SwiftStorage {
    pub fn new(api: Arc<dyn OpenStackApi>, container: impl Into<String>) -> Self {
        Self {
            api,
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }
}

impl std::fmt::Debug for SwiftStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftStorage")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for SwiftStorage {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.api.get_object(&self.container, name).await?)
    }

    async fn put(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.api.create_container(&self.container).await?;
        self.api.put_object(&self.container, name, &data).await?;
        tracing::debug!("Stored {}/{}", self.container, name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        match self.api.list_objects(&self.container, prefix).await {
            Ok(mut names) => {
                names.sort();
                Ok(names)
            }
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn url(&self, name: &str) -> Result<String> {
        let base = self.api.object_store_url().await?;
        Ok(format!("{}/{}/{}", base, self.container, name))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match self.api.delete_object(&self.container, name).await {
            Err(e) if !e.is_not_found() => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn remove_all(&self) -> Result<()> {
        for name in self.list("").await? {
            self.remove(&name).await?;
        }
        match self.api.delete_container(&self.container).await {
            Err(e) if !e.is_not_found() => Err(CloudError::from(e).context(format!(
                "cannot delete container {:?}",
                self.container
            ))),
            _ => Ok(()),
        }
    }
}

/// Read-only storage served over plain HTTP, such as a public bucket of
/// published tools
#[derive(Debug, Clone)]
pub struct PublicStorage {
    client: reqwest::Client,
    base_url: String,
}

impl PublicStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, url: &str, what: &str) -> Result<reqwest::Response> {
        tracing::debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CloudError::CommandFailed(format!("GET {}: {}", url, e)))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(what.to_string()));
        }
        if !resp.status().is_success() {
            return Err(CloudError::CommandFailed(format!(
                "GET {}: {}",
                url,
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Storage for PublicStorage {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.url(name).await?;
        let resp = self.fetch(&url, &format!("file {:?}", name)).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| CloudError::CommandFailed(format!("GET {}: {}", url, e)))?;
        Ok(body.to_vec())
    }

    async fn put(&self, _name: &str, _data: Vec<u8>) -> Result<()> {
        Err(CloudError::NotSupported("writing to public storage".into()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}?prefix={}", self.base_url, prefix);
        let body = match self.fetch(&url, "container").await {
            Ok(resp) => resp
                .text()
                .await
                .map_err(|e| CloudError::CommandFailed(format!("GET {}: {}", url, e)))?,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn url(&self, name: &str) -> Result<String> {
        Ok(format!("{}/{}", self.base_url, name))
    }

    async fn remove(&self, _name: &str) -> Result<()> {
        Err(CloudError::NotSupported("removing from public storage".into()))
    }

    async fn remove_all(&self) -> Result<()> {
        Err(CloudError::NotSupported("removing from public storage".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailKind, FakeOpenStack, OBJECT_STORE_URL};

    fn storage(fake: &FakeOpenStack) -> SwiftStorage {
        SwiftStorage::new(Arc::new(fake.clone()), "corral-bucket")
    }

    #[tokio::test]
    async fn test_put_creates_container() {
        let fake = FakeOpenStack::new();
        let storage = storage(&fake);
        assert!(storage.list("").await.unwrap().is_empty());

        storage.put("tools/released.json", b"[]".to_vec()).await.unwrap();
        assert!(fake.has_container("corral-bucket"));
        assert_eq!(storage.get("tools/released.json").await.unwrap(), b"[]");
        assert!(storage.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_url() {
        let fake = FakeOpenStack::new();
        let url = storage(&fake).url("provider-state").await.unwrap();
        assert_eq!(url, format!("{}/corral-bucket/provider-state", OBJECT_STORE_URL));
    }

    #[tokio::test]
    async fn test_remove_all_deletes_container() {
        let fake = FakeOpenStack::new();
        let storage = storage(&fake);
        storage.put("a", b"1".to_vec()).await.unwrap();
        storage.put("b", b"2".to_vec()).await.unwrap();
        storage.remove("missing").await.unwrap();

        storage.remove_all().await.unwrap();
        assert!(!fake.has_container("corral-bucket"));
        // Nothing left to remove.
        storage.remove_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_reports_failures() {
        let fake = FakeOpenStack::new();
        let storage = storage(&fake);
        storage.put("a", b"1".to_vec()).await.unwrap();
        fake.fail("delete_object", FailKind::Failed, 1);
        assert!(storage.remove_all().await.is_err());
    }

    #[tokio::test]
    async fn test_public_storage_is_read_only() {
        let public = PublicStorage::new("https://swift.example.com/v1/AUTH_x/corral-dist/");
        assert_eq!(
            public.url("tools/released.json").await.unwrap(),
            "https://swift.example.com/v1/AUTH_x/corral-dist/tools/released.json"
        );
        assert!(matches!(
            public.put("x", Vec::new()).await,
            Err(CloudError::NotSupported(_))
        ));
    }
}
