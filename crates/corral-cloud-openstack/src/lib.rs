//! OpenStack provider for Corral
//!
//! Starts, inspects and terminates Nova servers, manages the security
//! groups and floating IPs they need, and keeps environment state in a
//! Swift container. Cloud calls go through the [`OpenStackApi`] trait,
//! implemented by a wrapper around the `openstack` command line client.

pub mod address;
pub mod api;
pub mod cli;
pub mod config;
pub mod environ;
pub mod error;
pub mod groups;
pub mod provider;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use api::OpenStackApi;
pub use cli::OpenStackCli;
pub use config::{AuthMode, Credentials, EnvironConfig};
pub use environ::{ApiFactory, OpenStackEnviron, OpenStackInstance, cli_factory};
pub use error::{OpenStackError, Result};
pub use provider::{OpenStackProvider, PROVIDER_TYPE};
pub use storage::{PublicStorage, SwiftStorage};
