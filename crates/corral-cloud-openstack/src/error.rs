//! OpenStack provider error types

use corral_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("openstack client not found. Please install: pip install python-openstackclient")]
    ClientNotFound,

    #[error("openstack command failed: {0}")]
    CommandFailed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("unexpected openstack output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OpenStackError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OpenStackError::NotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, OpenStackError::Duplicate(_))
    }
}

impl From<OpenStackError> for CloudError {
    fn from(err: OpenStackError) -> Self {
        match err {
            OpenStackError::NotFound(what) => CloudError::NotFound(what),
            OpenStackError::Duplicate(what) => CloudError::Duplicate(what),
            OpenStackError::Io(e) => CloudError::Io(e),
            OpenStackError::Json(e) => CloudError::Json(e),
            other => CloudError::CommandFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
