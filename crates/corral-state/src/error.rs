//! State error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("status {0:?} not found")]
    NotFound(String),

    #[error("status {0:?} already exists")]
    AlreadyExists(String),

    #[error("status file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error(transparent)]
    Status(#[from] corral_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
