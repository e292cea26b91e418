//! Architectures and OS series

use crate::error::{CoreError, Result};

pub const AMD64: &str = "amd64";
pub const I386: &str = "i386";
pub const ARM64: &str = "arm64";
pub const ARMHF: &str = "armhf";
pub const PPC64EL: &str = "ppc64el";
pub const S390X: &str = "s390x";

/// Every architecture agents can be built for
pub const ALL_ARCHES: &[&str] = &[AMD64, I386, ARM64, ARMHF, PPC64EL, S390X];

/// Normalise an architecture name as reported by a toolchain or a cloud.
pub fn normalize_arch(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => AMD64.to_string(),
        "i386" | "i686" | "x86" => I386.to_string(),
        "aarch64" | "arm64" => ARM64.to_string(),
        "armv7l" | "armhf" | "arm" => ARMHF.to_string(),
        "ppc64le" | "ppc64el" | "powerpc64" => PPC64EL.to_string(),
        "s390x" => S390X.to_string(),
        other => other.to_string(),
    }
}

pub fn is_supported_arch(arch: &str) -> bool {
    ALL_ARCHES.contains(&arch)
}

/// The architecture of the machine this process runs on.
pub fn host_arch() -> String {
    normalize_arch(std::env::consts::ARCH)
}

const SERIES_VERSIONS: &[(&str, &str)] = &[
    ("precise", "12.04"),
    ("trusty", "14.04"),
    ("xenial", "16.04"),
    ("bionic", "18.04"),
    ("focal", "20.04"),
    ("jammy", "22.04"),
    ("noble", "24.04"),
];

/// The series new machines get when nothing else is specified
pub const LATEST_LTS_SERIES: &str = "noble";

/// Map an Ubuntu series name to its version (`trusty` -> `14.04`).
pub fn series_version(series: &str) -> Result<&'static str> {
    SERIES_VERSIONS
        .iter()
        .find(|(name, _)| *name == series)
        .map(|(_, version)| *version)
        .ok_or_else(|| CoreError::UnknownSeries(series.to_string()))
}

/// Map an OS version back to its series name (`14.04` -> `trusty`).
pub fn version_series(version: &str) -> Result<&'static str> {
    SERIES_VERSIONS
        .iter()
        .find(|(_, v)| *v == version)
        .map(|(name, _)| *name)
        .ok_or_else(|| CoreError::UnknownSeries(version.to_string()))
}
