//! Image and instance type selection

use crate::error::{CloudError, Result};
use corral_core::ImageMetadata;
use corral_core::arch::series_version;
use corral_core::constraints::Value;
use serde::{Deserialize, Serialize};

/// A compute offering (an OpenStack flavor). Sizes are in MiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceType {
    pub id: String,
    pub name: String,
    pub mem: u64,
    pub cpu_cores: u64,
    pub root_disk: u64,
}

impl InstanceType {
    fn satisfies(&self, cons: &Value) -> bool {
        if let Some(name) = &cons.instance_type {
            return &self.name == name;
        }
        cons.mem.is_none_or(|mem| self.mem >= mem)
            && cons.cpu_cores.is_none_or(|cores| self.cpu_cores >= cores)
            && cons.root_disk.is_none_or(|disk| self.root_disk >= disk)
    }

    fn cost(&self) -> (u64, u64, u64) {
        (self.mem, self.cpu_cores, self.root_disk)
    }
}

/// What a new instance has to satisfy
#[derive(Debug, Clone, Default)]
pub struct InstanceConstraint {
    pub region: String,
    pub series: String,
    /// Acceptable architectures, most preferred first
    pub arches: Vec<String>,
    pub constraints: Value,
    /// Flavor to use when the constraints say nothing about the shape
    pub default_instance_type: Option<String>,
}

/// A concrete image and instance type to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub image: ImageMetadata,
    pub instance_type: InstanceType,
}

/// Pick the image and cheapest instance type satisfying `ic`.
pub fn find_instance_spec(
    images: &[ImageMetadata],
    instance_types: &[InstanceType],
    ic: &InstanceConstraint,
) -> Result<InstanceSpec> {
    let version = series_version(&ic.series)?;

    let mut cons = ic.constraints.clone();
    let shapeless = cons.instance_type.is_none()
        && cons.mem.is_none()
        && cons.cpu_cores.is_none()
        && cons.root_disk.is_none();
    if shapeless {
        if let Some(default) = &ic.default_instance_type {
            if instance_types.iter().any(|it| &it.name == default) {
                cons.instance_type = Some(default.clone());
            }
        }
    }

    let instance_type = instance_types
        .iter()
        .filter(|it| it.satisfies(&cons))
        .min_by_key(|it| it.cost())
        .cloned()
        .ok_or_else(|| {
            CloudError::NotFound(format!("instance type satisfying {:?}", cons.to_string()))
        })?;

    let arch_rank = |arch: &str| ic.arches.iter().position(|a| a == arch);
    let image = images
        .iter()
        .filter(|img| img.version == version)
        .filter(|img| img.region_name.is_empty() || img.region_name == ic.region)
        .filter_map(|img| arch_rank(&img.arch).map(|rank| (rank, img)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, img)| img.clone())
        .ok_or_else(|| {
            CloudError::NotFound(format!(
                "{} image in region {:?} for architectures {:?}",
                ic.series, ic.region, ic.arches
            ))
        })?;

    Ok(InstanceSpec {
        image,
        instance_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavors() -> Vec<InstanceType> {
        vec![
            InstanceType {
                id: "1".into(),
                name: "m1.tiny".into(),
                mem: 512,
                cpu_cores: 1,
                root_disk: 1024,
            },
            InstanceType {
                id: "2".into(),
                name: "m1.small".into(),
                mem: 2048,
                cpu_cores: 1,
                root_disk: 20480,
            },
            InstanceType {
                id: "3".into(),
                name: "m1.medium".into(),
                mem: 4096,
                cpu_cores: 2,
                root_disk: 40960,
            },
        ]
    }

    fn images() -> Vec<ImageMetadata> {
        vec![
            ImageMetadata {
                id: "img-arm".into(),
                arch: "arm64".into(),
                version: "14.04".into(),
                region_name: "region-a".into(),
                ..Default::default()
            },
            ImageMetadata {
                id: "img-amd".into(),
                arch: "amd64".into(),
                version: "14.04".into(),
                region_name: "region-a".into(),
                ..Default::default()
            },
            ImageMetadata {
                id: "img-other-region".into(),
                arch: "amd64".into(),
                version: "14.04".into(),
                region_name: "region-b".into(),
                ..Default::default()
            },
        ]
    }

    fn constraint(cons: &str) -> InstanceConstraint {
        InstanceConstraint {
            region: "region-a".into(),
            series: "trusty".into(),
            arches: vec!["amd64".into(), "arm64".into()],
            constraints: cons.parse().unwrap(),
            default_instance_type: Some("m1.small".into()),
        }
    }

    #[test]
    fn test_default_flavor_without_shape() {
        let spec = find_instance_spec(&images(), &flavors(), &constraint("")).unwrap();
        assert_eq!(spec.instance_type.name, "m1.small");
        assert_eq!(spec.image.id, "img-amd");
    }

    #[test]
    fn test_cheapest_flavor_meeting_constraints() {
        let spec = find_instance_spec(&images(), &flavors(), &constraint("mem=3G")).unwrap();
        assert_eq!(spec.instance_type.name, "m1.medium");
    }

    #[test]
    fn test_explicit_instance_type() {
        let spec =
            find_instance_spec(&images(), &flavors(), &constraint("instance-type=m1.tiny")).unwrap();
        assert_eq!(spec.instance_type.name, "m1.tiny");
    }

    #[test]
    fn test_arch_preference_order() {
        let mut ic = constraint("");
        ic.arches = vec!["arm64".into(), "amd64".into()];
        let spec = find_instance_spec(&images(), &flavors(), &ic).unwrap();
        assert_eq!(spec.image.id, "img-arm");
    }

    #[test]
    fn test_no_matching_image() {
        let mut ic = constraint("");
        ic.series = "precise".into();
        let err = find_instance_spec(&images(), &flavors(), &ic).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unsatisfiable_constraints() {
        let err = find_instance_spec(&images(), &flavors(), &constraint("mem=64G")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_series() {
        let mut ic = constraint("");
        ic.series = "hoary-hedgehog".into();
        assert!(matches!(
            find_instance_spec(&images(), &flavors(), &ic),
            Err(CloudError::Core(_))
        ));
    }
}
