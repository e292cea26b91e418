use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "no environments file found. Looked for:\n\
        - current directory: environments.local.yaml, environments.yaml\n\
        - ./.corral/ directory\n\
        - ~/.config/corral/environments.yaml\n\
        Set CORRAL_ENVIRONMENTS_PATH to point at a file directly"
    )]
    EnvironmentsFileNotFound,

    #[error("environment {0:?} not found")]
    EnvironmentNotFound(String),

    #[error("no environment specified and no default environment set")]
    NoDefaultEnvironment,

    #[error("{0} attribute is missing")]
    MissingAttribute(&'static str),

    #[error("invalid {attr:?} attribute: {reason}")]
    InvalidAttribute { attr: String, reason: String },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
