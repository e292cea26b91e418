pub mod config;
pub mod error;

pub use config::{Config, FirewallMode, split_authorized_keys};
pub use error::*;

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Get the Corral configuration directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("corral");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the environments.yaml file
///
/// Search order:
/// 1. CORRAL_ENVIRONMENTS_PATH (explicit path)
/// 2. current directory: environments.local.yaml, environments.yaml
/// 3. ./.corral/ directory, same order
/// 4. ~/.config/corral/environments.yaml
pub fn find_environments_file() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CORRAL_ENVIRONMENTS_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["environments.local.yaml", "environments.yaml"];

    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let corral_dir = current_dir.join(".corral");
    if corral_dir.is_dir() {
        for filename in &candidates {
            let path = corral_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("corral").join("environments.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::EnvironmentsFileNotFound)
}

/// The parsed contents of an environments.yaml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environments {
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub environments: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Environments {
    pub fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Read and parse an environments file
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }

    /// The configuration of the named environment, or of the default one.
    /// The environment's name is injected as the `name` attribute.
    pub fn config(&self, name: Option<&str>) -> Result<Config> {
        let name = match name.or(self.default.as_deref()) {
            Some(name) => name,
            None if self.environments.len() == 1 => {
                self.environments.keys().next().map(String::as_str).unwrap_or_default()
            }
            None => return Err(ConfigError::NoDefaultEnvironment),
        };
        let mut attrs = self
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::EnvironmentNotFound(name.to_string()))?;
        attrs.insert(config::NAME.to_string(), Value::from(name));
        Config::new(attrs)
    }
}
