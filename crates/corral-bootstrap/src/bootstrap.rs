//! The bootstrap orchestrator

use crate::build::{build_tools_tarball, find_agent_binary};
use crate::error::{BootstrapError, Result};
use crate::images::bootstrap_image_metadata;
use crate::source::{DataSource, DirDataSource, HttpDataSource, IMAGES_PATH, StorageDataSource};
use crate::tools::{find_available_tools, set_bootstrap_tools};
use corral_cloud::{CloudError, Environ, EnvironBootstrapParams, InstanceConfig};
use corral_config::config::{ADMIN_SECRET, AGENT_VERSION, AUTHORIZED_KEYS, CA_CERT, CA_PRIVATE_KEY};
use corral_config::{Config, split_authorized_keys};
use corral_core::constraints::Value;
use corral_core::{ImageMetadata, Number, ToolsFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Names a file holding the public key metadata signatures are checked with
pub const SIGNING_KEY_ENV: &str = "CORRAL_STREAMS_PUBLICKEY_FILE";

/// Where a bootstrap looks for tools and images, and what it runs as
#[derive(Clone)]
pub struct BootstrapContext {
    pub tools_sources: Vec<Arc<dyn DataSource>>,
    pub image_sources: Vec<Arc<dyn DataSource>>,
    pub client_version: Number,

    /// The agent binary to pack when tools are built locally; defaults to
    /// `corral-agent` next to the running executable
    pub agent_binary: Option<PathBuf>,
}

impl BootstrapContext {
    pub fn new() -> Self {
        Self {
            tools_sources: Vec::new(),
            image_sources: Vec::new(),
            client_version: Number::current(),
            agent_binary: None,
        }
    }

    /// The sources an environment's configuration points at, followed by
    /// the environment's own storage.
    pub fn for_environ(environ: &dyn Environ) -> Self {
        let cfg = environ.config();
        let mut ctx = Self::new();
        if let Some(url) = cfg.agent_metadata_url() {
            ctx.tools_sources.push(Arc::new(HttpDataSource::new(url)));
        }
        if let Some(url) = cfg.image_metadata_url() {
            ctx.image_sources.push(Arc::new(HttpDataSource::new(url)));
        }
        let storage: Arc<dyn DataSource> =
            Arc::new(StorageDataSource::new("environment storage", environ.storage()));
        ctx.tools_sources.push(storage.clone());
        ctx.image_sources.push(storage);
        ctx
    }
}

impl Default for BootstrapContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BootstrapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let describe = |sources: &[Arc<dyn DataSource>]| -> Vec<String> {
            sources.iter().map(|s| s.description()).collect()
        };
        f.debug_struct("BootstrapContext")
            .field("tools_sources", &describe(&self.tools_sources))
            .field("image_sources", &describe(&self.image_sources))
            .field("client_version", &self.client_version)
            .field("agent_binary", &self.agent_binary)
            .finish()
    }
}

/// Parameters for [`bootstrap`]
#[derive(Debug, Clone, Default)]
pub struct BootstrapParams {
    /// Merged with the bootstrap constraints to choose the first machine,
    /// and kept as the environment's constraints
    pub environ_constraints: Value,

    /// Only used to choose the first machine
    pub bootstrap_constraints: Value,
    pub bootstrap_series: Option<String>,
    pub bootstrap_image: Option<String>,
    pub placement: Option<String>,

    /// Build tools from the local agent binary rather than use published
    /// tools
    pub upload_tools: bool,

    /// Local directory with `tools/` and `images/` metadata
    pub metadata_dir: Option<PathBuf>,

    /// The exact tools version agents start with
    pub agent_version: Option<Number>,
}

/// Bootstrap `environ`: start its first controller machine and install
/// the agent on it.
pub async fn bootstrap(ctx: &BootstrapContext, environ: &dyn Environ, params: BootstrapParams) -> Result<()> {
    let cfg = environ.config();
    check_config(&cfg)?;
    check_params(ctx, &params)?;

    let mut ctx = ctx.clone();
    let mut custom_images = Vec::new();
    if let Some(dir) = &params.metadata_dir {
        custom_images = set_private_metadata_sources(&mut ctx, dir).await?;
    }

    validate_constraints(environ, &params.environ_constraints)?;
    validate_constraints(environ, &params.bootstrap_constraints)?;
    let bootstrap_constraints = environ
        .constraints_validator()
        .merge(&params.environ_constraints, &params.bootstrap_constraints)?;

    tracing::info!("Bootstrapping environment {:?}", cfg.name());
    let available_tools = find_available_tools(
        &ctx,
        environ,
        params.agent_version.as_ref(),
        bootstrap_constraints.arch.as_deref(),
        params.bootstrap_series.as_deref(),
        params.upload_tools,
    )
    .await?;

    let image_metadata = bootstrap_image_metadata(
        &ctx,
        environ,
        &available_tools,
        params.bootstrap_image.as_deref(),
        &mut custom_images,
    )
    .await?;

    // Pin agent-version now; set_bootstrap_tools corrects it once the
    // tools are chosen.
    let agent_version = params
        .agent_version
        .clone()
        .unwrap_or_else(|| ctx.client_version.clone());
    let cfg = cfg.apply([(AGENT_VERSION, agent_version.to_string())])?;
    environ.set_config(cfg)?;

    tracing::info!("Starting new instance for initial controller");
    let result = environ
        .bootstrap(EnvironBootstrapParams {
            constraints: bootstrap_constraints,
            environ_constraints: params.environ_constraints.clone(),
            series: params.bootstrap_series.clone(),
            available_tools: available_tools.clone(),
            image_metadata,
            placement: params.placement.clone(),
        })
        .await?;

    let matching = available_tools.matching(&ToolsFilter {
        arch: Some(result.arch.clone()),
        series: Some(result.series.clone()),
        ..Default::default()
    })?;
    let mut selected = set_bootstrap_tools(environ, &matching, &ctx.client_version)?;

    // Held until the finaliser has copied the tarball to the machine
    let mut built = None;
    if selected.url.is_empty() {
        if !params.upload_tools {
            tracing::warn!("No prepackaged tools available");
        }
        tracing::info!("Building tools to upload ({})", selected.version);
        let tools = find_agent_binary(ctx.agent_binary.as_deref())
            .and_then(|agent| build_tools_tarball(&agent, &selected.version))
            .map_err(|e| match e {
                BootstrapError::BuildTools(_) => e,
                other => BootstrapError::BuildTools(other.to_string()),
            })?;
        selected.url = tools.url();
        selected.size = tools.size;
        selected.sha256 = tools.sha256.clone();
        built = Some(tools);
    }

    tracing::info!("Installing agent on bootstrap instance");
    let public_key = user_public_signing_key()?;
    let mut icfg = InstanceConfig::new_bootstrap(
        &environ.config(),
        params.bootstrap_constraints,
        params.environ_constraints,
        result.series,
        public_key,
    )?;
    icfg.tools = Some(selected);
    icfg.custom_image_metadata = custom_images;
    result.finalizer.finalize(icfg).await?;
    drop(built);

    tracing::info!("Bootstrap agent installed");
    Ok(())
}

/// Succeeds when `environ` has no controller yet.
pub async fn ensure_not_bootstrapped(environ: &dyn Environ) -> Result<()> {
    match environ.controller_instances().await {
        Ok(_) => Err(CloudError::AlreadyBootstrapped.into()),
        // TODO: report an environment whose controllers have all gone as
        // bootstrapped instead of treating NoInstances as absent.
        Err(e) if matches!(e.root(), CloudError::NoInstances | CloudError::NotBootstrapped) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn check_config(cfg: &Config) -> Result<()> {
    if cfg.admin_secret().is_empty() {
        return Err(BootstrapError::MissingConfig(ADMIN_SECRET));
    }
    if split_authorized_keys(cfg.authorized_keys()).is_empty() {
        return Err(BootstrapError::MissingConfig(AUTHORIZED_KEYS));
    }
    if cfg.ca_cert().is_none() {
        return Err(BootstrapError::MissingConfig(CA_CERT));
    }
    if cfg.ca_private_key().is_none() {
        return Err(BootstrapError::MissingConfig(CA_PRIVATE_KEY));
    }
    Ok(())
}

fn check_params(ctx: &BootstrapContext, params: &BootstrapParams) -> Result<()> {
    let Some(version) = &params.agent_version else {
        return Ok(());
    };
    if params.upload_tools {
        return Err(BootstrapError::InvalidParams(
            "agent-version and upload-tools cannot both be set".into(),
        ));
    }
    if version.major_minor() != ctx.client_version.major_minor() {
        return Err(BootstrapError::InvalidParams(format!(
            "requested agent version major.minor mismatch: {} vs client {}",
            version, ctx.client_version
        )));
    }
    Ok(())
}

/// Search `dir` for tools first, and for images when it has an `images`
/// subdirectory. Returns the image records found there.
async fn set_private_metadata_sources(ctx: &mut BootstrapContext, dir: &Path) -> Result<Vec<ImageMetadata>> {
    tracing::info!("Setting default tools and image metadata sources: {}", dir.display());
    tokio::fs::metadata(dir)
        .await
        .map_err(|e| BootstrapError::metadata(format!("cannot access metadata directory {}", dir.display()), e))?;
    let source = Arc::new(DirDataSource::new(dir));
    ctx.tools_sources.insert(0, source.clone());

    match tokio::fs::metadata(dir.join(IMAGES_PATH)).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BootstrapError::metadata("cannot access image metadata", e)),
    }
    let images = source
        .all_images()
        .await
        .map_err(|e| BootstrapError::metadata("cannot read image metadata", e))?;
    ctx.image_sources.insert(0, source);
    tracing::info!("Custom image metadata added to search path");
    Ok(images)
}

fn validate_constraints(environ: &dyn Environ, cons: &Value) -> Result<()> {
    let unsupported = environ.constraints_validator().validate(cons)?;
    if !unsupported.is_empty() {
        tracing::warn!("Unsupported constraints: {}", unsupported.join(", "));
    }
    Ok(())
}

/// The key named by [`SIGNING_KEY_ENV`], if set
fn user_public_signing_key() -> Result<Option<String>> {
    let Some(raw) = std::env::var_os(SIGNING_KEY_ENV) else {
        return Ok(None);
    };
    let raw = PathBuf::from(raw);
    let path = match raw.strip_prefix("~").ok().zip(dirs::home_dir()) {
        Some((rest, home)) => home.join(rest),
        None => raw.clone(),
    };
    let key = std::fs::read_to_string(&path).map_err(|source| BootstrapError::SigningKey { path, source })?;
    Ok(Some(key))
}
