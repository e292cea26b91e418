use crate::utils;
use colored::Colorize;
use corral_bootstrap::{BootstrapContext, BootstrapParams};
use corral_core::Number;
use corral_core::constraints::Value;
use std::path::PathBuf;

pub struct BootstrapArgs {
    pub constraints: String,
    pub bootstrap_constraints: String,
    pub bootstrap_series: Option<String>,
    pub bootstrap_image: Option<String>,
    pub placement: Option<String>,
    pub upload_tools: bool,
    pub metadata_source: Option<PathBuf>,
    pub agent_version: Option<String>,
}

impl BootstrapArgs {
    fn into_params(self) -> anyhow::Result<BootstrapParams> {
        let agent_version = self
            .agent_version
            .as_deref()
            .map(str::parse::<Number>)
            .transpose()?;
        Ok(BootstrapParams {
            environ_constraints: self.constraints.parse::<Value>()?,
            bootstrap_constraints: self.bootstrap_constraints.parse::<Value>()?,
            bootstrap_series: self.bootstrap_series,
            bootstrap_image: self.bootstrap_image,
            placement: self.placement,
            upload_tools: self.upload_tools,
            metadata_dir: self.metadata_source,
            agent_version,
        })
    }
}

pub async fn handle(environment: Option<&str>, args: BootstrapArgs) -> anyhow::Result<()> {
    // Bad flags should fail before anything talks to the cloud
    let params = args.into_params()?;
    let environ = utils::open_environ(environment)?;

    println!("{}", "Checking for an existing controller...".blue());
    corral_bootstrap::ensure_not_bootstrapped(environ.as_ref()).await?;

    let ctx = BootstrapContext::for_environ(environ.as_ref());
    tracing::debug!("Bootstrap context: {:?}", ctx);

    println!("{}", "Bootstrapping environment...".blue().bold());
    corral_bootstrap::bootstrap(&ctx, environ.as_ref(), params).await?;

    let statuses = utils::status_collection(&environ.config())?;
    match corral_state::Machine::create(statuses.into(), "0").await {
        Ok(_) => {}
        Err(corral_state::StateError::AlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }

    println!();
    println!(
        "{} {}",
        "✓ Bootstrapped".green().bold(),
        environ.name().cyan()
    );
    Ok(())
}
