//! The OpenStack operations the provider relies on
//!
//! [`OpenStackApi`] is implemented by the `openstack` CLI wrapper in
//! [`crate::cli`], and by an in-memory fake under the `test-utils` feature.

use crate::error::Result;
use async_trait::async_trait;
use corral_cloud::InstanceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_BUILD: &str = "BUILD";

/// One address of a server on a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub version: u8,
    pub addr: String,
}

impl IpAddress {
    /// An address, with the IP version inferred from its syntax
    pub fn parse(addr: &str) -> Self {
        let version = if addr.contains(':') { 6 } else { 4 };
        Self {
            version,
            addr: addr.to_string(),
        }
    }
}

/// Addresses keyed by network name, in the order the cloud reports them
pub type Addresses = BTreeMap<String, Vec<IpAddress>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub addresses: Addresses,
}

impl Server {
    /// Servers that are running or about to
    pub fn is_live(&self) -> bool {
        self.status == STATUS_ACTIVE || self.status == STATUS_BUILD
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub ip: String,
    /// Server the address is attached to, if any
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

/// An ingress rule. Without a CIDR the rule admits traffic from members
/// of the same group only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: Option<String>,
}

impl RuleInfo {
    pub fn new(protocol: &str, from_port: i32, to_port: i32, cidr: Option<&str>) -> Self {
        Self {
            protocol: protocol.to_string(),
            from_port,
            to_port,
            cidr: cidr.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunServerOpts {
    pub name: String,
    pub flavor_id: String,
    pub image_id: String,
    pub user_data: Vec<u8>,
    pub security_groups: Vec<String>,
}

/// Compute, network and object-store operations
#[async_trait]
pub trait OpenStackApi: Send + Sync {
    // Servers

    /// Servers whose name matches the `name` regular expression
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>>;

    async fn get_server(&self, id: &str) -> Result<Server>;

    /// Launch a server, returning its id
    async fn run_server(&self, opts: &RunServerOpts) -> Result<String>;

    async fn delete_server(&self, id: &str) -> Result<()>;

    async fn list_flavors(&self) -> Result<Vec<InstanceType>>;

    // Floating IPs

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>>;

    async fn allocate_floating_ip(&self, network: &str) -> Result<FloatingIp>;

    async fn add_server_floating_ip(&self, server_id: &str, ip: &str) -> Result<()>;

    /// Give a floating IP back to the pool, by id
    async fn release_floating_ip(&self, id: &str) -> Result<()>;

    // Security groups

    /// Create a group; an existing group of the same name fails with
    /// [`crate::OpenStackError::Duplicate`].
    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup>;

    async fn security_group_by_name(&self, name: &str) -> Result<SecurityGroup>;

    async fn create_security_group_rule(&self, group: &SecurityGroup, rule: &RuleInfo) -> Result<()>;

    // Object storage

    async fn create_container(&self, container: &str) -> Result<()>;

    async fn delete_container(&self, container: &str) -> Result<()>;

    async fn put_object(&self, container: &str, name: &str, data: &[u8]) -> Result<()>;

    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>>;

    async fn list_objects(&self, container: &str, prefix: &str) -> Result<Vec<String>>;

    async fn delete_object(&self, container: &str, name: &str) -> Result<()>;

    /// Base URL of the object store, without a trailing slash
    async fn object_store_url(&self) -> Result<String>;
}
