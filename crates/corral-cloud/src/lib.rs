//! Corral Cloud Environments
//!
//! This crate provides the cloud environment abstraction for Corral: the
//! machines, storage and configuration of one deployment, independent of
//! the cloud that hosts it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 corral-bootstrap                 │
//! │            (bootstrap / destroy-env)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                  corral-cloud                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait Environ / Instance / Storage      │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │   Attempts   │  │ Instance cfg │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   openstack   │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod attempt;
pub mod environ;
pub mod error;
pub mod instance;
pub mod instance_config;
pub mod instance_spec;
pub mod provider;
pub mod ssh;
pub mod storage;

// Re-exports
pub use attempt::{Attempt, AttemptStrategy, LONG_ATTEMPT, SHORT_ATTEMPT};
pub use environ::{BootstrapResult, Environ, EnvironBootstrapParams, Finalizer, StartInstanceParams};
pub use error::{CloudError, Result};
pub use instance::{Instance, InstanceId, InstanceLookup};
pub use instance_config::{API_PORT, ConnectionInfo, InstanceConfig, STATE_PORT};
pub use instance_spec::{InstanceConstraint, InstanceSpec, InstanceType, find_instance_spec};
pub use provider::EnvironProvider;
pub use ssh::SshFinalizer;
pub use storage::{BootstrapState, FileStorage, STATE_FILE, Storage, load_state, save_state};
