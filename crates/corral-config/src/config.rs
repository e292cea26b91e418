//! Environment configuration
//!
//! A [`Config`] is an immutable, validated set of attributes. Changing
//! anything goes through [`Config::apply`], which returns a new value and
//! leaves the original untouched.

use crate::error::{ConfigError, Result};
use corral_core::Number;
use serde_yaml::Value;
use std::collections::BTreeMap;

pub const NAME: &str = "name";
pub const TYPE: &str = "type";
pub const UUID: &str = "uuid";
pub const ADMIN_SECRET: &str = "admin-secret";
pub const AUTHORIZED_KEYS: &str = "authorized-keys";
pub const CA_CERT: &str = "ca-cert";
pub const CA_PRIVATE_KEY: &str = "ca-private-key";
pub const AGENT_VERSION: &str = "agent-version";
pub const AGENT_STREAM: &str = "agent-stream";
pub const IMAGE_STREAM: &str = "image-stream";
pub const DEFAULT_SERIES: &str = "default-series";
pub const FIREWALL_MODE: &str = "firewall-mode";
pub const AGENT_METADATA_URL: &str = "agent-metadata-url";
pub const IMAGE_METADATA_URL: &str = "image-metadata-url";
pub const PREFER_IPV6: &str = "prefer-ipv6";

const DEFAULT_STREAM: &str = "released";

/// How firewall rules are scoped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallMode {
    /// One security group per machine
    Instance,
    /// A single group shared by every machine
    Global,
}

impl FirewallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallMode::Instance => "instance",
            FirewallMode::Global => "global",
        }
    }
}

/// Environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    attrs: BTreeMap<String, Value>,
}

impl Config {
    /// Build a configuration from raw attributes, validating them.
    pub fn new(attrs: BTreeMap<String, Value>) -> Result<Self> {
        let config = Self { attrs };
        config.validate()?;
        Ok(config)
    }

    /// Return a new configuration with `changes` applied on top of this one.
    pub fn apply<I, K, V>(&self, changes: I) -> Result<Config>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut attrs = self.attrs.clone();
        for (key, value) in changes {
            attrs.insert(key.into(), value.into());
        }
        Config::new(attrs)
    }

    fn validate(&self) -> Result<()> {
        if self.name().is_empty() {
            return Err(ConfigError::MissingAttribute(NAME));
        }
        if self.provider_type().is_empty() {
            return Err(ConfigError::MissingAttribute(TYPE));
        }
        if let Some(raw) = self.get_str(AGENT_VERSION) {
            raw.parse::<Number>()
                .map_err(|e| ConfigError::InvalidAttribute {
                    attr: AGENT_VERSION.to_string(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(mode) = self.get_str(FIREWALL_MODE) {
            if mode != "instance" && mode != "global" {
                return Err(ConfigError::InvalidAttribute {
                    attr: FIREWALL_MODE.to_string(),
                    reason: format!("unknown mode {:?}", mode),
                });
            }
        }
        if let Some(value) = self.attrs.get(PREFER_IPV6) {
            if !value.is_bool() {
                return Err(ConfigError::InvalidAttribute {
                    attr: PREFER_IPV6.to_string(),
                    reason: "expected a boolean".to_string(),
                });
            }
        }
        Ok(())
    }

    /// A string attribute; empty strings count as unset.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn name(&self) -> &str {
        self.get_str(NAME).unwrap_or_default()
    }

    pub fn provider_type(&self) -> &str {
        self.get_str(TYPE).unwrap_or_default()
    }

    pub fn uuid(&self) -> &str {
        self.get_str(UUID).unwrap_or_default()
    }

    pub fn admin_secret(&self) -> &str {
        self.get_str(ADMIN_SECRET).unwrap_or_default()
    }

    pub fn authorized_keys(&self) -> &str {
        self.get_str(AUTHORIZED_KEYS).unwrap_or_default()
    }

    pub fn ca_cert(&self) -> Option<&str> {
        self.get_str(CA_CERT)
    }

    pub fn ca_private_key(&self) -> Option<&str> {
        self.get_str(CA_PRIVATE_KEY)
    }

    pub fn agent_version(&self) -> Option<Number> {
        self.get_str(AGENT_VERSION).and_then(|v| v.parse().ok())
    }

    pub fn agent_stream(&self) -> &str {
        self.get_str(AGENT_STREAM).unwrap_or(DEFAULT_STREAM)
    }

    pub fn image_stream(&self) -> &str {
        self.get_str(IMAGE_STREAM).unwrap_or(DEFAULT_STREAM)
    }

    pub fn default_series(&self) -> Option<&str> {
        self.get_str(DEFAULT_SERIES)
    }

    pub fn firewall_mode(&self) -> FirewallMode {
        match self.get_str(FIREWALL_MODE) {
            Some("global") => FirewallMode::Global,
            _ => FirewallMode::Instance,
        }
    }

    pub fn agent_metadata_url(&self) -> Option<&str> {
        self.get_str(AGENT_METADATA_URL)
    }

    pub fn image_metadata_url(&self) -> Option<&str> {
        self.get_str(IMAGE_METADATA_URL)
    }

    pub fn prefer_ipv6(&self) -> bool {
        self.attrs
            .get(PREFER_IPV6)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Split an authorized-keys blob into individual keys, skipping blank
/// lines and comments.
pub fn split_authorized_keys(keys: &str) -> Vec<&str> {
    keys.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config::new(BTreeMap::from([
            (NAME.to_string(), Value::from("test")),
            (TYPE.to_string(), Value::from("openstack")),
        ]))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = minimal();
        assert_eq!(cfg.agent_stream(), "released");
        assert_eq!(cfg.image_stream(), "released");
        assert_eq!(cfg.firewall_mode(), FirewallMode::Instance);
        assert!(cfg.agent_version().is_none());
        assert!(!cfg.prefer_ipv6());
        assert_eq!(cfg.admin_secret(), "");
    }

    #[test]
    fn test_apply_returns_new_config() {
        let cfg = minimal();
        let updated = cfg.apply([(AGENT_VERSION, "1.2.3")]).unwrap();
        assert_eq!(updated.agent_version().unwrap().to_string(), "1.2.3");
        assert!(cfg.agent_version().is_none());
    }

    #[test]
    fn test_apply_validates() {
        let cfg = minimal();
        assert!(cfg.apply([(AGENT_VERSION, "not-a-version")]).is_err());
        assert!(cfg.apply([(FIREWALL_MODE, "sometimes")]).is_err());
        assert!(cfg.apply([(NAME, "")]).is_err());
        assert!(cfg.apply([(PREFER_IPV6, "yes")]).is_err());
    }

    #[test]
    fn test_missing_type() {
        let err = Config::new(BTreeMap::from([(NAME.to_string(), Value::from("x"))])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute(TYPE)));
    }

    #[test]
    fn test_split_authorized_keys() {
        let keys = "ssh-rsa AAA one\n\n# comment\nssh-ed25519 BBB two\n";
        assert_eq!(
            split_authorized_keys(keys),
            vec!["ssh-rsa AAA one", "ssh-ed25519 BBB two"]
        );
        assert!(split_authorized_keys("  \n# only\n").is_empty());
    }
}
