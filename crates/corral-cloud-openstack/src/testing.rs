//! In-memory OpenStack for tests
//!
//! [`FakeOpenStack`] keeps servers, floating IPs, security groups and
//! objects in memory. Failures can be injected per operation, and newly
//! started servers can be made invisible for a number of lookups to mimic
//! eventual consistency.

use crate::api::{
    FloatingIp, IpAddress, OpenStackApi, RuleInfo, RunServerOpts, STATUS_ACTIVE, SecurityGroup,
    Server,
};
use crate::error::{OpenStackError, Result};
use async_trait::async_trait;
use corral_cloud::InstanceType;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

pub const OBJECT_STORE_URL: &str = "https://swift.example.com/v1/AUTH_test";

/// The kind of error an injected failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    NotFound,
    Duplicate,
    Failed,
}

impl FailKind {
    fn error(self, op: &str) -> OpenStackError {
        match self {
            FailKind::NotFound => OpenStackError::NotFound(format!("injected {}", op)),
            FailKind::Duplicate => OpenStackError::Duplicate(format!("injected {}", op)),
            FailKind::Failed => OpenStackError::CommandFailed(format!("injected {} failure", op)),
        }
    }
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    servers: BTreeMap<String, Server>,
    /// Lookups left before a server becomes visible
    invisible: HashMap<String, usize>,
    visibility_delay: usize,
    new_server_status: Option<String>,
    launched: Vec<RunServerOpts>,
    flavors: Vec<InstanceType>,
    floating_ips: Vec<FloatingIp>,
    groups: BTreeMap<String, (SecurityGroup, Vec<RuleInfo>)>,
    containers: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    failures: HashMap<String, (FailKind, usize)>,
    calls: Vec<String>,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn visible(&mut self, id: &str) -> bool {
        match self.invisible.get_mut(id) {
            Some(0) | None => true,
            Some(left) => {
                *left -= 1;
                false
            }
        }
    }
}

/// An in-memory [`OpenStackApi`]
#[derive(Clone, Default)]
pub struct FakeOpenStack {
    state: Arc<Mutex<FakeState>>,
}

impl FakeOpenStack {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.lock().flavors = vec![
            flavor("1", "m1.tiny", 512, 1, 1),
            flavor("2", "m1.small", 2048, 1, 20),
            flavor("3", "m1.medium", 4096, 2, 40),
            flavor("4", "m1.large", 8192, 4, 80),
        ];
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and return the injected failure for it, if any
    fn enter(&self, op: &str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(op.to_string());
        if let Some((kind, left)) = state.failures.get_mut(op) {
            let kind = *kind;
            *left -= 1;
            if *left == 0 {
                state.failures.remove(op);
            }
            return Err(kind.error(op));
        }
        Ok(state)
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail(&self, op: &str, kind: FailKind, times: usize) {
        self.lock().failures.insert(op.to_string(), (kind, times));
    }

    /// Make `op` fail until [`FakeOpenStack::clear_failures`] is called.
    pub fn fail_always(&self, op: &str, kind: FailKind) {
        self.fail(op, kind, usize::MAX);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Hide servers started from now on for `lookups` lookups each.
    pub fn set_visibility_delay(&self, lookups: usize) {
        self.lock().visibility_delay = lookups;
    }

    /// Status new servers are created with (`ACTIVE` by default).
    pub fn set_new_server_status(&self, status: &str) {
        self.lock().new_server_status = Some(status.to_string());
    }

    pub fn set_server_status(&self, id: &str, status: &str) {
        if let Some(server) = self.lock().servers.get_mut(id) {
            server.status = status.to_string();
        }
    }

    /// Add a server directly, bypassing `run_server`. The visibility
    /// delay still applies.
    pub fn add_server(&self, server: Server) {
        let mut state = self.lock();
        let delay = state.visibility_delay;
        if delay > 0 {
            state.invisible.insert(server.id.clone(), delay);
        }
        state.servers.insert(server.id.clone(), server);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }

    pub fn servers(&self) -> Vec<Server> {
        self.lock().servers.values().cloned().collect()
    }

    pub fn launched(&self) -> Vec<RunServerOpts> {
        self.lock().launched.clone()
    }

    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.lock().floating_ips.clone()
    }

    pub fn add_floating_ip(&self, ip: FloatingIp) {
        self.lock().floating_ips.push(ip);
    }

    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().groups.values().map(|(g, _)| g.clone()).collect()
    }

    pub fn rules(&self, group: &str) -> Vec<RuleInfo> {
        self.lock()
            .groups
            .get(group)
            .map(|(_, rules)| rules.clone())
            .unwrap_or_default()
    }

    pub fn objects(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.lock().containers.contains_key(container)
    }
}

fn flavor(id: &str, name: &str, mem: u64, cpu_cores: u64, disk_gb: u64) -> InstanceType {
    InstanceType {
        id: id.to_string(),
        name: name.to_string(),
        mem,
        cpu_cores,
        root_disk: disk_gb * 1024,
    }
}

#[async_trait]
impl OpenStackApi for FakeOpenStack {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>> {
        let mut state = self.enter("list_servers")?;
        let pattern = regex::Regex::new(&format!("^(?:{})$", name))
            .map_err(|e| OpenStackError::CommandFailed(e.to_string()))?;
        let candidates: Vec<Server> = state
            .servers
            .values()
            .filter(|s| pattern.is_match(&s.name))
            .cloned()
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|s| state.visible(&s.id))
            .collect())
    }

    async fn get_server(&self, id: &str) -> Result<Server> {
        let mut state = self.enter("get_server")?;
        let server = state
            .servers
            .get(id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("server {:?}", id)))?;
        if !state.visible(id) {
            return Err(OpenStackError::NotFound(format!("server {:?}", id)));
        }
        Ok(server)
    }

    async fn run_server(&self, opts: &RunServerOpts) -> Result<String> {
        let mut state = self.enter("run_server")?;
        if !state.flavors.iter().any(|f| f.id == opts.flavor_id) {
            return Err(OpenStackError::NotFound(format!("flavor {:?}", opts.flavor_id)));
        }
        for group in &opts.security_groups {
            if !state.groups.contains_key(group) {
                return Err(OpenStackError::NotFound(format!("security group {:?}", group)));
            }
        }
        let id = state.id("srv");
        let host = state.servers.len() + 2;
        let status = state
            .new_server_status
            .clone()
            .unwrap_or_else(|| STATUS_ACTIVE.to_string());
        let server = Server {
            id: id.clone(),
            name: opts.name.clone(),
            status,
            addresses: BTreeMap::from([(
                "private".to_string(),
                vec![IpAddress::parse(&format!("10.0.0.{}", host))],
            )]),
        };
        state.servers.insert(id.clone(), server);
        let delay = state.visibility_delay;
        if delay > 0 {
            state.invisible.insert(id.clone(), delay);
        }
        state.launched.push(opts.clone());
        Ok(id)
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let mut state = self.enter("delete_server")?;
        state
            .servers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OpenStackError::NotFound(format!("server {:?}", id)))
    }

    async fn list_flavors(&self) -> Result<Vec<InstanceType>> {
        let state = self.enter("list_flavors")?;
        Ok(state.flavors.clone())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        let state = self.enter("list_floating_ips")?;
        Ok(state.floating_ips.clone())
    }

    async fn allocate_floating_ip(&self, _network: &str) -> Result<FloatingIp> {
        let mut state = self.enter("allocate_floating_ip")?;
        let id = state.id("fip");
        let ip = FloatingIp {
            id,
            ip: format!("203.0.113.{}", state.floating_ips.len() + 10),
            instance_id: None,
        };
        state.floating_ips.push(ip.clone());
        Ok(ip)
    }

    async fn add_server_floating_ip(&self, server_id: &str, ip: &str) -> Result<()> {
        let mut state = self.enter("add_server_floating_ip")?;
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or_else(|| OpenStackError::NotFound(format!("server {:?}", server_id)))?;
        server
            .addresses
            .entry("public".to_string())
            .or_default()
            .push(IpAddress::parse(ip));
        let fip = state
            .floating_ips
            .iter_mut()
            .find(|f| f.ip == ip)
            .ok_or_else(|| OpenStackError::NotFound(format!("floating ip {:?}", ip)))?;
        fip.instance_id = Some(server_id.to_string());
        Ok(())
    }

    async fn release_floating_ip(&self, id: &str) -> Result<()> {
        let mut state = self.enter("release_floating_ip")?;
        let before = state.floating_ips.len();
        state.floating_ips.retain(|f| f.id != id);
        if state.floating_ips.len() == before {
            return Err(OpenStackError::NotFound(format!("floating ip {:?}", id)));
        }
        Ok(())
    }

    async fn create_security_group(&self, name: &str, _description: &str) -> Result<SecurityGroup> {
        let mut state = self.enter("create_security_group")?;
        if state.groups.contains_key(name) {
            return Err(OpenStackError::Duplicate(format!("security group {:?}", name)));
        }
        let group = SecurityGroup {
            id: state.id("sg"),
            name: name.to_string(),
        };
        state
            .groups
            .insert(name.to_string(), (group.clone(), Vec::new()));
        Ok(group)
    }

    async fn security_group_by_name(&self, name: &str) -> Result<SecurityGroup> {
        let state = self.enter("security_group_by_name")?;
        state
            .groups
            .get(name)
            .map(|(g, _)| g.clone())
            .ok_or_else(|| OpenStackError::NotFound(format!("security group {:?}", name)))
    }

    async fn create_security_group_rule(&self, group: &SecurityGroup, rule: &RuleInfo) -> Result<()> {
        let mut state = self.enter("create_security_group_rule")?;
        let (_, rules) = state
            .groups
            .get_mut(&group.name)
            .ok_or_else(|| OpenStackError::NotFound(format!("security group {:?}", group.name)))?;
        if rules.contains(rule) {
            return Err(OpenStackError::Duplicate("security group rule".to_string()));
        }
        rules.push(rule.clone());
        Ok(())
    }

    async fn create_container(&self, container: &str) -> Result<()> {
        let mut state = self.enter("create_container")?;
        state.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        let mut state = self.enter("delete_container")?;
        match state.containers.get(container) {
            None => Err(OpenStackError::NotFound(format!("container {:?}", container))),
            Some(objects) if !objects.is_empty() => Err(OpenStackError::CommandFailed(format!(
                "container {:?} is not empty",
                container
            ))),
            Some(_) => {
                state.containers.remove(container);
                Ok(())
            }
        }
    }

    async fn put_object(&self, container: &str, name: &str, data: &[u8]) -> Result<()> {
        let mut state = self.enter("put_object")?;
        let objects = state
            .containers
            .get_mut(container)
            .ok_or_else(|| OpenStackError::NotFound(format!("container {:?}", container)))?;
        objects.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let state = self.enter("get_object")?;
        state
            .containers
            .get(container)
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("object {:?}", name)))
    }

    async fn list_objects(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let state = self.enter("list_objects")?;
        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| OpenStackError::NotFound(format!("container {:?}", container)))?;
        Ok(objects
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        let mut state = self.enter("delete_object")?;
        state
            .containers
            .get_mut(container)
            .and_then(|objects| objects.remove(name))
            .map(|_| ())
            .ok_or_else(|| OpenStackError::NotFound(format!("object {:?}", name)))
    }

    async fn object_store_url(&self) -> Result<String> {
        let _state = self.enter("object_store_url")?;
        Ok(OBJECT_STORE_URL.to_string())
    }
}
