//! Bootstrap error types

use std::path::PathBuf;
use thiserror::Error;

pub const NO_TOOLS_MESSAGE: &str = "Corral cannot bootstrap because no tools are available for your environment.\n\
You may want to use the 'agent-metadata-url' configuration setting to specify the tools location.";

/// Bootstrap errors
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("model configuration has no {0}")]
    MissingConfig(&'static str),

    #[error("{}", NO_TOOLS_MESSAGE)]
    NoTools,

    #[error("no image metadata found for {0}")]
    NoImage(String),

    #[error("invalid bootstrap parameters: {0}")]
    InvalidParams(String),

    #[error("no bootstrap tools available")]
    NoBootstrapTools,

    #[error("failed to update model configuration: {0}")]
    UpdateConfig(String),

    #[error("cannot build tools for {arch:?} using a machine running on {host:?}")]
    CrossArchBuild { arch: String, host: String },

    #[error("cannot upload bootstrap tools: {0}")]
    BuildTools(String),

    #[error("{0} not valid")]
    NotValid(String),

    #[error("{0} not supported")]
    NotSupported(String),

    #[error("{context}: {message}")]
    Metadata { context: String, message: String },

    #[error("invalid public key file: {path}: {source}")]
    SigningKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cloud(#[from] corral_cloud::CloudError),

    #[error(transparent)]
    Core(#[from] corral_core::CoreError),

    #[error(transparent)]
    Config(#[from] corral_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BootstrapError {
    pub fn metadata(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        BootstrapError::Metadata {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
