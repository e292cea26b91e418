//! The OpenStack provider

use crate::config::{EnvironConfig, PASSWORD, TENANT_NAME, USERNAME};
use crate::environ::{ApiFactory, OpenStackEnviron, cli_factory};
use corral_cloud::{CloudError, Environ, EnvironProvider, Result, SHORT_ATTEMPT};
use corral_config::Config;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PROVIDER_TYPE: &str = "openstack";

/// Instance metadata service reachable from inside a server
pub const METADATA_HOST: &str = "http://169.254.169.254";

const BOILERPLATE: &str = r#"## OpenStack (Keystone v2 credentials)
openstack:
  type: openstack
  admin-secret: {{rand}}
  # Globally unique swift container name
  control-bucket: corral-{{rand}}
  # Usually set via the env variable OS_AUTH_URL, but can be specified here
  # auth-url: https://yourkeystoneurl:443/v2.0/
  # Override if your workstation runs a different series to the one you deploy
  # default-series: trusty
  # userpass (the default) or legacy
  auth-mode: userpass
  # Usually set via the env variable OS_USERNAME, but can be specified here
  # username: <your username>
  # Usually set via the env variable OS_PASSWORD, but can be specified here
  # password: <secret>
  # Usually set via the env variable OS_TENANT_NAME, but can be specified here
  # tenant-name: <your tenant name>
  # Usually set via the env variable OS_REGION_NAME, but can be specified here
  # region: <your region>
  # Network floating IPs are allocated from
  # external-network: public
"#;

/// Opens environments on OpenStack clouds
#[derive(Clone)]
pub struct OpenStackProvider {
    factory: ApiFactory,
}

impl OpenStackProvider {
    /// A provider driving the `openstack` CLI
    pub fn new() -> Self {
        Self {
            factory: cli_factory(),
        }
    }

    pub fn with_factory(factory: ApiFactory) -> Self {
        Self { factory }
    }

    pub fn open_environ(&self, cfg: Config) -> Result<OpenStackEnviron> {
        tracing::info!("Opening environment {:?}", cfg.name());
        OpenStackEnviron::new(cfg, self.factory.clone())
    }

    /// The public address of the machine this runs on
    pub async fn public_address(&self) -> Result<String> {
        fetch_metadata(METADATA_HOST, "public-hostname").await
    }

    /// The private address of the machine this runs on
    pub async fn private_address(&self) -> Result<String> {
        fetch_metadata(METADATA_HOST, "local-hostname").await
    }
}

impl Default for OpenStackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironProvider for OpenStackProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    fn open(&self, cfg: Config) -> Result<Arc<dyn Environ>> {
        Ok(Arc::new(self.open_environ(cfg)?))
    }

    fn validate(&self, new: Config, old: Option<&Config>) -> Result<Config> {
        if new.provider_type() != PROVIDER_TYPE {
            return Err(CloudError::InvalidConfig(format!(
                "environment type {:?} is not {:?}",
                new.provider_type(),
                PROVIDER_TYPE
            )));
        }
        let ecfg = EnvironConfig::new(new)?;
        if let Some(old) = old {
            EnvironConfig::new(old.clone())?.validate_change(&ecfg)?;
        }
        Ok(ecfg.into_config())
    }

    fn secret_attrs(&self, cfg: &Config) -> Result<BTreeMap<String, String>> {
        let ecfg = EnvironConfig::new(cfg.clone())?;
        Ok(BTreeMap::from([
            (USERNAME.to_string(), ecfg.username().to_string()),
            (PASSWORD.to_string(), ecfg.password().to_string()),
            (TENANT_NAME.to_string(), ecfg.tenant_name().to_string()),
        ]))
    }

    fn boilerplate_config(&self) -> String {
        BOILERPLATE.to_string()
    }
}

pub fn metadata_url(host: &str, name: &str) -> String {
    format!("{}/2011-01-01/meta-data/{}", host.trim_end_matches('/'), name)
}

/// Read a value from the instance metadata service, retrying for the
/// short attempt.
pub async fn fetch_metadata(host: &str, name: &str) -> Result<String> {
    let url = metadata_url(host, name);
    let client = reqwest::Client::new();
    let mut attempt = SHORT_ATTEMPT.start();
    let mut last_error = String::new();
    while attempt.next().await {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| CloudError::CommandFailed(format!("GET {}: {}", url, e)))?;
                return Ok(body.trim().to_string());
            }
            Ok(resp) => last_error = resp.status().to_string(),
            Err(e) => last_error = e.to_string(),
        }
        tracing::debug!("Metadata {}: {}", url, last_error);
    }
    Err(CloudError::CommandFailed(format!(
        "cannot get {:?} info: {}",
        name, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOpenStack;
    use serde_yaml::Value;

    fn config(extra: &[(&str, &str)]) -> Config {
        let mut attrs: BTreeMap<String, Value> = [
            ("name", "test"),
            ("type", "openstack"),
            ("control-bucket", "corral-bucket"),
            ("auth-url", "https://keystone.example.com/v2.0/"),
            ("username", "user"),
            ("password", "secret"),
            ("tenant-name", "tenant"),
            ("region", "region-a"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect();
        for (k, v) in extra {
            attrs.insert(k.to_string(), Value::from(*v));
        }
        Config::new(attrs).unwrap()
    }

    fn provider() -> OpenStackProvider {
        let fake = FakeOpenStack::new();
        OpenStackProvider::with_factory(Arc::new(move |_: &EnvironConfig| {
            Arc::new(fake.clone()) as Arc<dyn crate::api::OpenStackApi>
        }))
    }

    #[test]
    fn test_secret_attrs() {
        let secrets = provider().secret_attrs(&config(&[])).unwrap();
        assert_eq!(secrets.len(), 3);
        assert_eq!(secrets["username"], "user");
        assert_eq!(secrets["password"], "secret");
        assert_eq!(secrets["tenant-name"], "tenant");
    }

    #[test]
    fn test_validate_rejects_bucket_change() {
        let p = provider();
        let old = config(&[]);
        assert!(p.validate(config(&[]), Some(&old)).is_ok());
        let err = p
            .validate(config(&[("control-bucket", "other")]), Some(&old))
            .unwrap_err();
        assert!(err.to_string().contains("control-bucket"));
    }

    #[test]
    fn test_validate_rejects_other_types() {
        assert!(provider().validate(config(&[("type", "ec2")]), None).is_err());
    }

    #[test]
    fn test_boilerplate_is_yaml() {
        let text = provider().boilerplate_config().replace("{{rand}}", "abc");
        let doc: Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(doc["openstack"]["type"], Value::from("openstack"));
        assert_eq!(doc["openstack"]["control-bucket"], Value::from("corral-abc"));
    }

    #[test]
    fn test_open() {
        let environ = provider().open(config(&[])).unwrap();
        assert_eq!(environ.name(), "test");
        assert_eq!(environ.region().unwrap().region, "region-a");
    }

    #[test]
    fn test_metadata_url() {
        assert_eq!(
            metadata_url("http://169.254.169.254/", "public-hostname"),
            "http://169.254.169.254/2011-01-01/meta-data/public-hostname"
        );
    }
}
