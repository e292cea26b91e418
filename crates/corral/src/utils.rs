use colored::Colorize;
use corral_cloud::{Environ, EnvironProvider};
use corral_cloud_openstack::OpenStackProvider;
use corral_config::{Config, Environments};
use corral_state::StatusCollection;
use std::path::PathBuf;
use std::sync::Arc;

/// Every provider this binary can open environments with
pub fn providers() -> Vec<Box<dyn EnvironProvider>> {
    vec![Box::new(OpenStackProvider::new())]
}

/// Read the chosen environment's configuration from environments.yaml
pub fn load_config(environment: Option<&str>) -> anyhow::Result<Config> {
    let path = corral_config::find_environments_file()?;
    tracing::debug!("Reading environments from {}", path.display());
    let envs = Environments::read(&path)?;
    let cfg = envs.config(environment)?;
    println!(
        "Environment: {} ({})",
        cfg.name().cyan(),
        path.display().to_string().dimmed()
    );
    Ok(cfg)
}

/// Validate and open the chosen environment with its provider
pub fn open_environ(environment: Option<&str>) -> anyhow::Result<Arc<dyn Environ>> {
    let cfg = load_config(environment)?;
    let provider = providers()
        .into_iter()
        .find(|p| p.provider_type() == cfg.provider_type())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "environment {:?} has unknown provider type {:?}",
                cfg.name(),
                cfg.provider_type()
            )
        })?;
    let cfg = provider.validate(cfg, None)?;
    Ok(provider.open(cfg)?)
}

/// The status documents kept for an environment
pub fn status_collection(cfg: &Config) -> anyhow::Result<StatusCollection> {
    let path: PathBuf = corral_config::get_config_dir()?
        .join("environments")
        .join(cfg.name())
        .join("statuses.json");
    let env_uuid = if cfg.uuid().is_empty() {
        cfg.name()
    } else {
        cfg.uuid()
    };
    Ok(StatusCollection::new(path, env_uuid))
}
