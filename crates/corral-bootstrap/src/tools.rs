//! Bootstrap tools selection

use crate::bootstrap::BootstrapContext;
use crate::error::{BootstrapError, Result};
use corral_cloud::Environ;
use corral_config::config::AGENT_VERSION;
use corral_core::arch::{LATEST_LTS_SERIES, host_arch};
use corral_core::{Binary, Number, Tools, ToolsFilter, ToolsList};

/// Find the tools a bootstrap may use.
///
/// With `upload` the result is the tools that can be built locally for the
/// client version, with its build number bumped. Otherwise the context's
/// tools sources are searched; when they have nothing and the version is a
/// development version, locally built tools are used instead.
pub async fn find_available_tools(
    ctx: &BootstrapContext,
    environ: &dyn Environ,
    agent_version: Option<&Number>,
    arch: Option<&str>,
    series: Option<&str>,
    upload: bool,
) -> Result<ToolsList> {
    if upload {
        if agent_version.is_some() {
            return Err(BootstrapError::InvalidParams(
                "agent-version and upload-tools cannot both be set".into(),
            ));
        }
        return locally_buildable_tools(ctx, environ, arch, series);
    }

    let cfg = environ.config();
    let explicit = agent_version.cloned().or_else(|| cfg.agent_version());
    let version = explicit.clone().unwrap_or_else(|| ctx.client_version.clone());
    let filter = ToolsFilter {
        number: explicit,
        major_minor: Some(version.major_minor()),
        series: series.map(str::to_string),
        arch: arch.map(str::to_string),
    };

    let stream = cfg.agent_stream();
    for source in &ctx.tools_sources {
        tracing::debug!("Looking for {} tools in {}", stream, source.description());
        let found = source.fetch_tools(stream).await?;
        if let Ok(list) = found.matching(&filter) {
            tracing::info!("Found {} tools in {}", list.len(), source.description());
            return Ok(list);
        }
    }

    if version.is_dev() {
        tracing::info!("No published tools for development version {}, building locally", version);
        return locally_buildable_tools(ctx, environ, arch, series);
    }
    Err(BootstrapError::NoTools)
}

/// Tools for the client version, built on this machine once a bootstrap
/// instance is up. They carry no URL until built.
fn locally_buildable_tools(
    ctx: &BootstrapContext,
    environ: &dyn Environ,
    arch: Option<&str>,
    series: Option<&str>,
) -> Result<ToolsList> {
    let host = host_arch();
    let arch = arch.map(str::to_string).unwrap_or_else(|| host.clone());
    if arch != host {
        return Err(BootstrapError::CrossArchBuild { arch, host });
    }
    if !environ.supported_architectures().contains(&arch) {
        return Err(BootstrapError::NotSupported(format!(
            "building tools for architecture {:?}",
            arch
        )));
    }

    let cfg = environ.config();
    let series = series
        .or(cfg.default_series())
        .unwrap_or(LATEST_LTS_SERIES)
        .to_string();
    let number = ctx.client_version.with_build(ctx.client_version.build + 1);
    Ok(ToolsList::new(vec![Tools::new(
        Binary::new(number, series, arch),
        "",
    )]))
}

/// Pick the tools to bootstrap with from `possible`.
///
/// The environment's `agent-version` is set to the newest version found.
/// The machine itself gets tools compatible with `client` when there are
/// any, so that it runs the client's own version and upgrades from there.
pub fn set_bootstrap_tools(environ: &dyn Environ, possible: &ToolsList, client: &Number) -> Result<Tools> {
    let (newest, mut list) = possible.newest().ok_or(BootstrapError::NoBootstrapTools)?;
    tracing::info!("Newest version: {}", newest);

    let cfg = environ.config();
    if cfg.agent_version().as_ref() != Some(&newest) {
        cfg.apply([(AGENT_VERSION, newest.to_string())])
            .map_err(|e| BootstrapError::UpdateConfig(e.to_string()))
            .and_then(|cfg| {
                environ
                    .set_config(cfg)
                    .map_err(|e| BootstrapError::UpdateConfig(e.to_string()))
            })?;
    }

    let mut bootstrap_version = newest.clone();
    if !is_compatible_version(&newest, client) {
        match find_compatible_tools(possible, client) {
            Some((version, compatible)) => {
                bootstrap_version = version;
                list = compatible;
            }
            None => tracing::warn!("Failed to find {} tools, will attempt to use {}", client, newest),
        }
    }
    tracing::info!("Picked bootstrap tools version: {}", bootstrap_version);
    list.first().cloned().ok_or(BootstrapError::NoBootstrapTools)
}

/// Every entry in `possible` compatible with `version`
pub fn compatible_tools(possible: &ToolsList, version: &Number) -> ToolsList {
    possible
        .iter()
        .filter(|t| is_compatible_version(t.number(), version))
        .cloned()
        .collect()
}

/// The newest tools in `possible` that are compatible with `version`
pub fn find_compatible_tools(possible: &ToolsList, version: &Number) -> Option<(Number, ToolsList)> {
    compatible_tools(possible, version).newest()
}

/// Versions are compatible when they differ at most in build number.
pub fn is_compatible_version(a: &Number, b: &Number) -> bool {
    a.is_compatible(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(vs: &[&str]) -> ToolsList {
        vs.iter()
            .map(|v| Tools::new(v.parse().unwrap(), format!("https://example.com/{v}.tgz")))
            .collect()
    }

    #[test]
    fn test_is_compatible_version() {
        let v: Number = "1.2.3".parse().unwrap();
        assert!(is_compatible_version(&"1.2.3.9".parse().unwrap(), &v));
        assert!(is_compatible_version(&v, &"1.2.3.1".parse().unwrap()));
        assert!(!is_compatible_version(&"1.2.4".parse().unwrap(), &v));
        assert!(!is_compatible_version(&"1.3.3".parse().unwrap(), &v));
    }

    #[test]
    fn test_find_compatible_tools() {
        let possible = list(&[
            "1.2.3.1-trusty-amd64",
            "1.2.3.9-trusty-amd64",
            "1.2.4.0-trusty-amd64",
        ]);
        let (version, tools) = find_compatible_tools(&possible, &"1.2.3.5".parse().unwrap()).unwrap();
        assert_eq!(version.to_string(), "1.2.3.9");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools.first().unwrap().version.to_string(), "1.2.3.9-trusty-amd64");
    }

    #[test]
    fn test_compatible_tools_keeps_every_build() {
        let possible = list(&[
            "1.2.3.1-trusty-amd64",
            "1.2.3.9-trusty-amd64",
            "1.2.4.0-trusty-amd64",
        ]);
        let compatible = compatible_tools(&possible, &"1.2.3.5".parse().unwrap());
        let mut versions: Vec<String> = compatible.iter().map(|t| t.number().to_string()).collect();
        versions.sort();
        assert_eq!(versions, vec!["1.2.3.1", "1.2.3.9"]);

        let (newest, _) = compatible.newest().unwrap();
        assert_eq!(newest.to_string(), "1.2.3.9");
    }

    #[test]
    fn test_find_compatible_tools_none() {
        let possible = list(&["1.2.4-trusty-amd64"]);
        assert!(find_compatible_tools(&possible, &"1.2.3".parse().unwrap()).is_none());
        assert!(find_compatible_tools(&ToolsList::default(), &"1.2.3".parse().unwrap()).is_none());
    }
}
