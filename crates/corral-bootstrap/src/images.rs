//! Bootstrap image metadata selection

use crate::bootstrap::BootstrapContext;
use crate::error::{BootstrapError, Result};
use corral_cloud::Environ;
use corral_core::arch::series_version;
use corral_core::{ImageConstraint, ImageMetadata, ToolsList};

/// The image metadata the bootstrap machine is chosen from.
///
/// Environments without a region get none. An explicit `image_id` is
/// turned into a single record for the one arch and series the tools
/// cover; that record is also appended to `custom`, so the controller
/// keeps knowing about it. Otherwise the context's image sources are
/// searched.
pub async fn bootstrap_image_metadata(
    ctx: &BootstrapContext,
    environ: &dyn Environ,
    tools: &ToolsList,
    image_id: Option<&str>,
    custom: &mut Vec<ImageMetadata>,
) -> Result<Vec<ImageMetadata>> {
    let cfg = environ.config();
    let Some(region) = environ.region() else {
        if image_id.is_some() {
            return Err(BootstrapError::NotSupported(format!(
                "specifying bootstrap image for {:?} provider",
                cfg.provider_type()
            )));
        }
        return Ok(Vec::new());
    };

    if let Some(id) = image_id {
        let arches = tools.arches();
        if arches.len() != 1 {
            return Err(BootstrapError::NotValid("multiple architectures with bootstrap image".into()));
        }
        let all_series = tools.all_series();
        if all_series.len() != 1 {
            return Err(BootstrapError::NotValid("multiple series with bootstrap image".into()));
        }
        let meta = ImageMetadata {
            id: id.to_string(),
            arch: arches[0].clone(),
            version: series_version(&all_series[0])?.to_string(),
            region_name: region.region.clone(),
            endpoint: region.endpoint.clone(),
            stream: cfg.image_stream().to_string(),
            ..Default::default()
        };
        custom.push(meta.clone());
        return Ok(vec![meta]);
    }

    let versions = tools
        .all_series()
        .iter()
        .map(|s| series_version(s).map(str::to_string))
        .collect::<corral_core::Result<Vec<_>>>()?;
    let constraint = ImageConstraint {
        cloud: Some(region.clone()),
        versions,
        arches: tools.arches(),
        stream: Some(cfg.image_stream().to_string()),
    };

    let stream = cfg.image_stream();
    for source in &ctx.image_sources {
        let images = source
            .fetch_images(stream)
            .await
            .map_err(|e| BootstrapError::metadata("searching image metadata", e))?;
        let found = constraint.filter(images);
        if !found.is_empty() {
            tracing::debug!("Found {} images in {}", found.len(), source.description());
            return Ok(found);
        }
    }
    Err(BootstrapError::NoImage(format!(
        "series {:?} arches {:?} in region {:?}",
        tools.all_series(),
        tools.arches(),
        region.region
    )))
}
