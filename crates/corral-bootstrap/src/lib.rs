//! Corral environment bootstrap
//!
//! Turns an empty cloud environment into one running its first controller:
//! validate configuration and constraints, choose tools and images, start
//! the machine through the provider, then install the agent on it.
//!
//! ```text
//! bootstrap()
//!   ├─ check config (admin-secret, authorized-keys, CA)
//!   ├─ metadata sources (metadata dir, agent/image metadata URLs, storage)
//!   ├─ constraints: validate + merge
//!   ├─ find_available_tools / bootstrap_image_metadata
//!   ├─ Environ::bootstrap → arch, series, finaliser
//!   ├─ set_bootstrap_tools (build locally when there is no URL)
//!   └─ finaliser(InstanceConfig)
//! ```

pub mod bootstrap;
pub mod build;
pub mod error;
pub mod images;
pub mod source;
pub mod tools;

pub use bootstrap::{BootstrapContext, BootstrapParams, SIGNING_KEY_ENV, bootstrap, ensure_not_bootstrapped};
pub use build::{AGENT_BINARY, BuiltTools, build_tools_tarball};
pub use error::{BootstrapError, Result};
pub use images::bootstrap_image_metadata;
pub use source::{DataSource, DirDataSource, HttpDataSource, StorageDataSource};
pub use tools::{find_available_tools, find_compatible_tools, is_compatible_version, set_bootstrap_tools};
