//! Provider instances

use crate::attempt::LONG_ATTEMPT;
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A provider-assigned instance identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        InstanceId(id.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        InstanceId(id)
    }
}

/// A running (or starting) machine in a cloud
#[async_trait]
pub trait Instance: Send + Sync + fmt::Debug {
    fn id(&self) -> InstanceId;

    /// The instance's public address. Fails with [`CloudError::NoDnsName`]
    /// while no address has been assigned yet.
    async fn dns_name(&self) -> Result<String>;

    /// Poll [`Instance::dns_name`] until an address shows up or the long
    /// attempt budget runs out.
    async fn wait_dns_name(&self) -> Result<String> {
        let mut attempt = LONG_ATTEMPT.start();
        while attempt.next().await {
            match self.dns_name().await {
                Err(CloudError::NoDnsName) => continue,
                other => return other,
            }
        }
        Err(CloudError::Timeout(format!(
            "timed out trying to get DNS address for {}",
            self.id()
        )))
    }
}

/// The outcome of looking up a set of instance ids
///
/// `instances` lines up with the requested ids; `None` marks an id that
/// could not be resolved.
#[derive(Debug, Clone)]
pub struct InstanceLookup {
    pub instances: Vec<Option<Arc<dyn Instance>>>,
}

impl InstanceLookup {
    /// Whether some requested ids were not found
    pub fn is_partial(&self) -> bool {
        self.instances.iter().any(Option::is_none)
    }

    /// The instances that were found
    pub fn found(&self) -> impl Iterator<Item = &Arc<dyn Instance>> {
        self.instances.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct SlowAddress {
        calls: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl Instance for SlowAddress {
        fn id(&self) -> InstanceId {
            "i-slow".into()
        }

        async fn dns_name(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.ready_after {
                return Err(CloudError::NoDnsName);
            }
            Ok("203.0.113.7".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_dns_name_retries_until_ready() {
        let inst = SlowAddress {
            calls: AtomicU32::new(0),
            ready_after: 4,
        };
        assert_eq!(inst.wait_dns_name().await.unwrap(), "203.0.113.7");
        assert_eq!(inst.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_dns_name_times_out() {
        let inst = SlowAddress {
            calls: AtomicU32::new(0),
            ready_after: u32::MAX,
        };
        let err = inst.wait_dns_name().await.unwrap_err();
        assert!(err.to_string().contains("timed out trying to get DNS address for i-slow"));
    }

    #[test]
    fn test_lookup_partial() {
        let found: Arc<dyn Instance> = Arc::new(SlowAddress {
            calls: AtomicU32::new(0),
            ready_after: 0,
        });
        let lookup = InstanceLookup {
            instances: vec![Some(found), None],
        };
        assert!(lookup.is_partial());
        assert_eq!(lookup.found().count(), 1);
    }
}
