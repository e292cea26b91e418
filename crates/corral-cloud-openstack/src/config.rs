//! OpenStack environment configuration
//!
//! Provider attributes live alongside the common ones in the environment's
//! [`Config`]. Credentials left out of `environments.yaml` are taken from
//! the usual `OS_*` environment variables when the configuration is
//! opened, and written back into it so later snapshots see the same values.

use corral_config::{Config, ConfigError, Result};
use reqwest::Url;

pub const AUTH_URL: &str = "auth-url";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const TENANT_NAME: &str = "tenant-name";
pub const REGION: &str = "region";
pub const AUTH_MODE: &str = "auth-mode";
pub const CONTROL_BUCKET: &str = "control-bucket";
pub const PUBLIC_BUCKET: &str = "public-bucket";
pub const PUBLIC_BUCKET_URL: &str = "public-bucket-url";
pub const EXTERNAL_NETWORK: &str = "external-network";

const DEFAULT_EXTERNAL_NETWORK: &str = "public";

/// Environment variables consulted for attributes that are not set
const ENV_FALLBACKS: &[(&str, &[&str])] = &[
    (AUTH_URL, &["OS_AUTH_URL"]),
    (USERNAME, &["OS_USERNAME", "NOVA_USERNAME"]),
    (PASSWORD, &["OS_PASSWORD", "NOVA_PASSWORD"]),
    (TENANT_NAME, &["OS_TENANT_NAME", "NOVA_PROJECT_ID"]),
    (REGION, &["OS_REGION_NAME", "NOVA_REGION"]),
];

/// How the client authenticates with keystone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    UserPass,
    Legacy,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::UserPass => "userpass",
            AuthMode::Legacy => "legacy",
        }
    }
}

/// The credentials handed to the API client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub tenant_name: String,
    pub region: String,
}

/// A validated OpenStack environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironConfig {
    config: Config,
    auth_mode: AuthMode,
}

impl EnvironConfig {
    pub fn new(cfg: Config) -> Result<Self> {
        let fallbacks: Vec<(&str, String)> = ENV_FALLBACKS
            .iter()
            .filter(|(attr, _)| cfg.get_str(attr).is_none())
            .filter_map(|(attr, vars)| {
                vars.iter()
                    .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
                    .map(|value| (*attr, value))
            })
            .collect();
        let config = if fallbacks.is_empty() {
            cfg
        } else {
            cfg.apply(fallbacks)?
        };

        let auth_mode = match config.get_str(AUTH_MODE).unwrap_or("userpass") {
            "userpass" => AuthMode::UserPass,
            "legacy" => AuthMode::Legacy,
            other => {
                return Err(ConfigError::InvalidAttribute {
                    attr: AUTH_MODE.to_string(),
                    reason: format!("invalid authorization mode: {:?}", other),
                });
            }
        };

        let ecfg = Self { config, auth_mode };
        ecfg.validate()?;
        Ok(ecfg)
    }

    fn validate(&self) -> Result<()> {
        let auth_url = self.required(AUTH_URL)?;
        let parsed = Url::parse(auth_url).map_err(|e| ConfigError::InvalidAttribute {
            attr: AUTH_URL.to_string(),
            reason: format!("invalid auth-url value {:?}: {}", auth_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidAttribute {
                attr: AUTH_URL.to_string(),
                reason: format!("invalid auth-url value {:?}: expected http or https", auth_url),
            });
        }
        if self.auth_mode == AuthMode::UserPass {
            self.required(USERNAME)?;
            self.required(PASSWORD)?;
            self.required(TENANT_NAME)?;
        }
        self.required(REGION)?;
        self.required(CONTROL_BUCKET)?;
        if self.config.get_str(PUBLIC_BUCKET_URL).is_some() {
            Url::parse(self.public_bucket_url()).map_err(|e| ConfigError::InvalidAttribute {
                attr: PUBLIC_BUCKET_URL.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn required(&self, attr: &'static str) -> Result<&str> {
        self.config
            .get_str(attr)
            .ok_or(ConfigError::MissingAttribute(attr))
    }

    /// Reject changes to attributes that cannot change once an
    /// environment exists.
    pub fn validate_change(&self, new: &EnvironConfig) -> Result<()> {
        if self.control_bucket() != new.control_bucket() {
            return Err(ConfigError::InvalidAttribute {
                attr: CONTROL_BUCKET.to_string(),
                reason: format!(
                    "cannot change control-bucket from {:?} to {:?}",
                    self.control_bucket(),
                    new.control_bucket()
                ),
            });
        }
        if self.config.name() != new.config.name() {
            return Err(ConfigError::InvalidAttribute {
                attr: "name".to_string(),
                reason: "cannot change the environment name".to_string(),
            });
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    fn attr(&self, key: &str) -> &str {
        self.config.get_str(key).unwrap_or_default()
    }

    pub fn auth_url(&self) -> &str {
        self.attr(AUTH_URL)
    }

    pub fn username(&self) -> &str {
        self.attr(USERNAME)
    }

    pub fn password(&self) -> &str {
        self.attr(PASSWORD)
    }

    pub fn tenant_name(&self) -> &str {
        self.attr(TENANT_NAME)
    }

    pub fn region(&self) -> &str {
        self.attr(REGION)
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn control_bucket(&self) -> &str {
        self.attr(CONTROL_BUCKET)
    }

    pub fn public_bucket(&self) -> &str {
        self.attr(PUBLIC_BUCKET)
    }

    pub fn public_bucket_url(&self) -> &str {
        self.attr(PUBLIC_BUCKET_URL)
    }

    pub fn external_network(&self) -> &str {
        self.config
            .get_str(EXTERNAL_NETWORK)
            .unwrap_or(DEFAULT_EXTERNAL_NETWORK)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            auth_url: self.auth_url().to_string(),
            username: self.username().to_string(),
            password: self.password().to_string(),
            tenant_name: self.tenant_name().to_string(),
            region: self.region().to_string(),
        }
    }
}
