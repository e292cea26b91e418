//! Image metadata
//!
//! Candidate boot images for new machines, as published by image
//! metadata sources or synthesised from an explicit image id.

use serde::{Deserialize, Serialize};

/// The region of a cloud a metadata lookup is scoped to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSpec {
    pub region: String,
    pub endpoint: String,
}

impl CloudSpec {
    pub fn new(region: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// A single boot image record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageMetadata {
    pub id: String,
    pub arch: String,

    /// OS version, e.g. `14.04`
    pub version: String,

    #[serde(default)]
    pub region_name: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub stream: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virt_type: Option<String>,
}

/// Criteria for selecting image records. Empty lists match anything.
#[derive(Debug, Clone, Default)]
pub struct ImageConstraint {
    pub cloud: Option<CloudSpec>,

    /// OS versions (not series names)
    pub versions: Vec<String>,
    pub arches: Vec<String>,
    pub stream: Option<String>,
}

impl ImageConstraint {
    pub fn matches(&self, image: &ImageMetadata) -> bool {
        if let Some(cloud) = &self.cloud {
            if !image.region_name.is_empty() && image.region_name != cloud.region {
                return false;
            }
            if !image.endpoint.is_empty()
                && !cloud.endpoint.is_empty()
                && image.endpoint.trim_end_matches('/') != cloud.endpoint.trim_end_matches('/')
            {
                return false;
            }
        }
        if !self.versions.is_empty() && !self.versions.contains(&image.version) {
            return false;
        }
        if !self.arches.is_empty() && !self.arches.contains(&image.arch) {
            return false;
        }
        if let Some(stream) = &self.stream {
            // Records without a stream belong to the released stream.
            let image_stream = if image.stream.is_empty() {
                "released"
            } else {
                image.stream.as_str()
            };
            if image_stream != stream {
                return false;
            }
        }
        true
    }

    pub fn filter(&self, images: impl IntoIterator<Item = ImageMetadata>) -> Vec<ImageMetadata> {
        images.into_iter().filter(|i| self.matches(i)).collect()
    }
}
