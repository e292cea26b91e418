//! Cloud environment error types

use thiserror::Error;

/// Cloud environment errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("no instances found")]
    NoInstances,

    #[error("environment is not bootstrapped")]
    NotBootstrapped,

    #[error("environment is already bootstrapped")]
    AlreadyBootstrapped,

    #[error("no DNS name yet")]
    NoDnsName,

    #[error("{0} not supported")]
    NotSupported(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error(transparent)]
    Core(#[from] corral_core::CoreError),

    #[error(transparent)]
    Config(#[from] corral_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CloudError {
    /// Wrap the error with a message describing what was being attempted.
    pub fn context(self, message: impl Into<String>) -> Self {
        CloudError::Context {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any context wrappers.
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), CloudError::NotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.root(), CloudError::Duplicate(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
