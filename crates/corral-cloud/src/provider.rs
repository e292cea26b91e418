//! Environment providers

use crate::environ::Environ;
use crate::error::Result;
use corral_config::Config;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A kind of cloud that environments can be opened on
pub trait EnvironProvider: Send + Sync {
    /// The `type` attribute selecting this provider
    fn provider_type(&self) -> &'static str;

    /// Open an environment, validating its configuration first.
    fn open(&self, cfg: Config) -> Result<Arc<dyn Environ>>;

    /// Validate `new`, checking it against `old` when an existing
    /// configuration is being changed. Returns the configuration with
    /// provider defaults filled in.
    fn validate(&self, new: Config, old: Option<&Config>) -> Result<Config>;

    /// Attributes that must not be written anywhere but the client
    fn secret_attrs(&self, cfg: &Config) -> Result<BTreeMap<String, String>>;

    /// A sample `environments.yaml` stanza
    fn boilerplate_config(&self) -> String;
}
