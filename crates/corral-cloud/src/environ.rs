//! The cloud environment abstraction

use crate::error::Result;
use crate::instance::{Instance, InstanceId, InstanceLookup};
use crate::instance_config::InstanceConfig;
use crate::storage::Storage;
use async_trait::async_trait;
use corral_config::Config;
use corral_core::constraints::{Validator, Value};
use corral_core::{CloudSpec, ImageMetadata, ToolsList};
use std::sync::Arc;

/// Everything needed to start one machine
#[derive(Debug, Clone)]
pub struct StartInstanceParams {
    pub machine_id: String,
    pub constraints: Value,

    /// Candidate tools; the provider picks one whose arch it can serve
    pub tools: ToolsList,
    pub instance_config: InstanceConfig,
    pub image_metadata: Vec<ImageMetadata>,
    pub placement: Option<String>,
    pub with_public_ip: bool,
}

/// What the bootstrap orchestrator hands a provider
#[derive(Debug, Clone, Default)]
pub struct EnvironBootstrapParams {
    /// Merged environment and bootstrap constraints
    pub constraints: Value,
    pub environ_constraints: Value,

    /// Overrides the environment's default series
    pub series: Option<String>,
    pub available_tools: ToolsList,
    pub image_metadata: Vec<ImageMetadata>,
    pub placement: Option<String>,
}

/// Completes a bootstrap once the final instance configuration is known
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(self: Box<Self>, icfg: InstanceConfig) -> Result<()>;
}

/// The result of starting the bootstrap machine
pub struct BootstrapResult {
    pub arch: String,
    pub series: String,
    pub finalizer: Box<dyn Finalizer>,
}

impl std::fmt::Debug for BootstrapResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapResult")
            .field("arch", &self.arch)
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

/// A cloud environment: the machines, storage and configuration of one
/// deployment
#[async_trait]
pub trait Environ: Send + Sync {
    fn name(&self) -> String;

    /// The current configuration
    fn config(&self) -> Config;

    /// Replace the configuration. Calls already in flight keep using the
    /// configuration they started with.
    fn set_config(&self, cfg: Config) -> Result<()>;

    fn constraints_validator(&self) -> Validator;

    /// Architectures the environment can launch
    fn supported_architectures(&self) -> Vec<String>;

    /// The region lookups are scoped to, if the environment has one
    fn region(&self) -> Option<CloudSpec>;

    fn storage(&self) -> Arc<dyn Storage>;

    /// Start the first controller machine.
    async fn bootstrap(&self, params: EnvironBootstrapParams) -> Result<BootstrapResult>;

    /// Ids of the machines running the controller.
    async fn controller_instances(&self) -> Result<Vec<InstanceId>>;

    async fn start_instance(&self, params: StartInstanceParams) -> Result<Arc<dyn Instance>>;

    async fn instances(&self, ids: &[InstanceId]) -> Result<InstanceLookup>;

    async fn all_instances(&self) -> Result<Vec<Arc<dyn Instance>>>;

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<()>;

    /// Terminate every instance (plus `ensure`, which may not be listed
    /// yet) and delete the environment's storage.
    async fn destroy(&self, ensure: &[InstanceId]) -> Result<()>;
}
