//! Local tools building
//!
//! When no published tools fit, the agent binary shipped alongside the
//! client is packed into a tools tarball that the bootstrap finaliser
//! uploads itself.

use crate::error::{BootstrapError, Result};
use corral_core::Binary;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Builder;
use tempfile::TempDir;

pub const AGENT_BINARY: &str = "corral-agent";

/// Written into the tarball so the agent reports the bumped version
const FORCE_VERSION_FILE: &str = "FORCE-VERSION";

/// A tools tarball in a temporary directory, removed on drop
#[derive(Debug)]
pub struct BuiltTools {
    pub version: Binary,
    pub storage_name: String,
    pub size: u64,
    pub sha256: String,
    dir: TempDir,
}

impl BuiltTools {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join(&self.storage_name)
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.path().display())
    }
}

/// `corral-agent-1.2.3.1-trusty-amd64.tgz`
pub fn storage_name(version: &Binary) -> String {
    format!("{}-{}.tgz", AGENT_BINARY, version)
}

/// Locate the agent binary: `explicit` when given, otherwise next to the
/// running executable.
pub fn find_agent_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let exe = std::env::current_exe()?;
            let dir = exe
                .parent()
                .ok_or_else(|| BootstrapError::BuildTools(format!("{} has no parent directory", exe.display())))?;
            dir.join(AGENT_BINARY)
        }
    };
    if !path.is_file() {
        return Err(BootstrapError::BuildTools(format!(
            "agent binary not found at {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Pack `agent` into a gzipped tarball for `version`.
pub fn build_tools_tarball(agent: &Path, version: &Binary) -> Result<BuiltTools> {
    tracing::debug!("Building tools tarball for {} from {}", version, agent.display());
    let dir = tempfile::Builder::new().prefix("corral-tools").tempdir()?;
    let name = storage_name(version);
    let path = dir.path().join(&name);

    {
        let encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        let mut tar = Builder::new(encoder);

        let mut agent_file = File::open(agent)?;
        tar.append_file(AGENT_BINARY, &mut agent_file)?;

        let forced = version.number.to_string();
        let mut header = tar::Header::new_gnu();
        header
            .set_path(FORCE_VERSION_FILE)
            .map_err(|e| BootstrapError::BuildTools(format!("cannot add {}: {}", FORCE_VERSION_FILE, e)))?;
        header.set_size(forced.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append(&header, forced.as_bytes())?;

        tar.into_inner()?.finish()?;
    }

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut file = File::open(&path)?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let sha256 = format!("{:x}", hasher.finalize());
    tracing::debug!("Built {}: {} bytes, sha256 {}", name, size, sha256);

    Ok(BuiltTools {
        version: version.clone(),
        storage_name: name,
        size,
        sha256,
        dir,
    })
}
