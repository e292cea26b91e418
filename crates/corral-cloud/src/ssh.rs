//! Bootstrap finalisation over SSH
//!
//! The bootstrap machine boots with nothing but the client's SSH keys.
//! Once it has an address, the provisioning script is piped to
//! `sudo bash -s` on it.

use crate::attempt::LONG_ATTEMPT;
use crate::environ::Finalizer;
use crate::error::{CloudError, Result};
use crate::instance::Instance;
use crate::instance_config::InstanceConfig;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_SSH_USER: &str = "ubuntu";

/// ssh exits with 255 when the connection itself fails
const SSH_CONNECTION_FAILED: i32 = 255;

/// Local path of a `file://` tools URL
pub fn local_tools_path(url: &str) -> Option<&str> {
    url.strip_prefix("file://")
}

/// Finishes a bootstrap by provisioning the machine over SSH
pub struct SshFinalizer {
    instance: Arc<dyn Instance>,
    user: String,
    program: String,
}

impl SshFinalizer {
    pub fn new(instance: Arc<dyn Instance>) -> Self {
        Self {
            instance,
            user: DEFAULT_SSH_USER.to_string(),
            program: "ssh".to_string(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Use another ssh-compatible client binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn render(&self, icfg: &InstanceConfig) -> Result<String> {
        let tools = icfg
            .tools
            .as_ref()
            .ok_or_else(|| CloudError::InvalidConfig("bootstrap machine has no tools".into()))?;
        match local_tools_path(&tools.url) {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                icfg.provisioning_script(Some(&bytes))
            }
            None => icfg.provisioning_script(None),
        }
    }

    async fn run(&self, target: &str, script: &str) -> Result<std::process::Output> {
        tracing::debug!("Running: {} {} sudo bash -s", self.program, target);
        let mut child = Command::new(&self.program)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(target)
            .arg("sudo bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // ssh closes its end early when the connection fails; the exit
            // status decides the attempt.
            match stdin.write_all(script.as_bytes()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!("{} closed stdin early", self.program);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(child.wait_with_output().await?)
    }
}

impl std::fmt::Debug for SshFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshFinalizer")
            .field("instance", &self.instance.id())
            .field("user", &self.user)
            .field("program", &self.program)
            .finish()
    }
}

#[async_trait]
impl Finalizer for SshFinalizer {
    async fn finalize(self: Box<Self>, icfg: InstanceConfig) -> Result<()> {
        let script = self.render(&icfg).await?;
        let addr = self.instance.wait_dns_name().await?;
        let target = format!("{}@{}", self.user, addr);
        tracing::info!("Provisioning bootstrap machine at {}", addr);

        let mut attempt = LONG_ATTEMPT.start();
        let mut last_error = String::new();
        while attempt.next().await {
            let output = self.run(&target, &script).await?;
            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if output.status.code() != Some(SSH_CONNECTION_FAILED) {
                return Err(CloudError::CommandFailed(format!(
                    "provisioning {} failed: {}",
                    addr, stderr
                )));
            }
            tracing::debug!("ssh to {} not ready: {}", addr, stderr);
            last_error = stderr;
        }
        Err(CloudError::Timeout(format!(
            "cannot connect to bootstrap machine at {}: {}",
            addr, last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceId;
    use corral_core::Tools;

    #[derive(Debug)]
    struct NoAddress;

    #[async_trait]
    impl Instance for NoAddress {
        fn id(&self) -> InstanceId {
            "i-0".into()
        }

        async fn dns_name(&self) -> Result<String> {
            Err(CloudError::NoDnsName)
        }
    }

    #[test]
    fn test_local_tools_path() {
        assert_eq!(local_tools_path("file:///tmp/x.tgz"), Some("/tmp/x.tgz"));
        assert_eq!(local_tools_path("https://example.com/x.tgz"), None);
    }

    #[tokio::test]
    async fn test_finalize_without_tools_fails_before_connecting() {
        let finalizer = Box::new(SshFinalizer::new(Arc::new(NoAddress)));
        let icfg = InstanceConfig::new("0", "trusty", Default::default(), Default::default());
        let err = finalizer.finalize(icfg).await.unwrap_err();
        assert!(err.to_string().contains("no tools"));
    }

    #[tokio::test]
    async fn test_render_embeds_local_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.tgz");
        std::fs::write(&path, b"tarball").unwrap();

        let mut icfg = InstanceConfig::new(
            "1",
            "trusty",
            crate::ConnectionInfo {
                addrs: vec!["10.0.0.1:37017".into()],
                ca_cert: "CA".into(),
                ..Default::default()
            },
            crate::ConnectionInfo {
                addrs: vec!["10.0.0.1:17070".into()],
                ca_cert: "CA".into(),
                ..Default::default()
            },
        );
        icfg.tools = Some(Tools::new(
            "1.2.3-trusty-amd64".parse().unwrap(),
            format!("file://{}", path.display()),
        ));

        let finalizer = SshFinalizer::new(Arc::new(NoAddress)).with_user("root");
        let script = finalizer.render(&icfg).await.unwrap();
        assert!(script.contains("base64 -d"));
        assert!(!script.contains("curl"));
    }

    #[derive(Debug)]
    struct FixedAddress;

    #[async_trait]
    impl Instance for FixedAddress {
        fn id(&self) -> InstanceId {
            "i-1".into()
        }

        async fn dns_name(&self) -> Result<String> {
            Ok("10.0.0.1".into())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finalize_retries_when_ssh_exits_before_reading() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().join("tools.tgz");
        std::fs::write(&tools, vec![7u8; 2 * 1024 * 1024]).unwrap();

        // Refuses the first connection without touching stdin.
        let fake = dir.path().join("fake-ssh");
        std::fs::write(
            &fake,
            format!(
                "#!/bin/sh\n\
                 dir='{}'\n\
                 echo call >> \"$dir/calls\"\n\
                 if [ ! -e \"$dir/refused\" ]; then\n\
                 \ttouch \"$dir/refused\"\n\
                 \techo 'Connection refused' >&2\n\
                 \texit 255\n\
                 fi\n\
                 cat > \"$dir/received\"\n",
                dir.path().display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut icfg = InstanceConfig::new(
            "0",
            "trusty",
            crate::ConnectionInfo {
                addrs: vec!["10.0.0.1:37017".into()],
                ca_cert: "CA".into(),
                ..Default::default()
            },
            crate::ConnectionInfo {
                addrs: vec!["10.0.0.1:17070".into()],
                ca_cert: "CA".into(),
                ..Default::default()
            },
        );
        icfg.tools = Some(Tools::new(
            "1.2.3-trusty-amd64".parse().unwrap(),
            format!("file://{}", tools.display()),
        ));

        let finalizer = Box::new(
            SshFinalizer::new(Arc::new(FixedAddress)).with_program(fake.display().to_string()),
        );
        finalizer.finalize(icfg).await.unwrap();

        let calls = std::fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls.lines().count(), 2);
        let received = std::fs::metadata(dir.path().join("received")).unwrap();
        assert!(received.len() > 2 * 1024 * 1024);
    }
}
