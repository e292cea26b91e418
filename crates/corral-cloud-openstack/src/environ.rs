//! The OpenStack environment
//!
//! Every operation works on a snapshot of the configuration, the API
//! client built for it, and the environment's storage. `set_config` builds
//! a fresh snapshot and swaps it in; operations already running keep the
//! one they started with, and instances keep the one that created them.

use crate::address::instance_address;
use crate::api::{FloatingIp, OpenStackApi, RunServerOpts, Server};
use crate::cli::OpenStackCli;
use crate::config::EnvironConfig;
use crate::groups::set_up_groups;
use crate::storage::{PublicStorage, SwiftStorage};
use async_trait::async_trait;
use corral_cloud::instance_config::machine_tag;
use corral_cloud::{
    BootstrapResult, BootstrapState, CloudError, ConnectionInfo, Environ, EnvironBootstrapParams,
    Instance, InstanceConstraint, InstanceId, InstanceLookup, LONG_ATTEMPT, Result,
    SHORT_ATTEMPT, SshFinalizer, StartInstanceParams, Storage, API_PORT, STATE_PORT,
    find_instance_spec, load_state, save_state,
};
use corral_config::Config;
use corral_core::arch::{AMD64, ARM64, I386, LATEST_LTS_SERIES, PPC64EL};
use corral_core::constraints::{self, Validator};
use corral_core::{CloudSpec, ToolsFilter};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

const DEFAULT_INSTANCE_TYPE: &str = "m1.small";
const DEFAULT_PUBLIC_BUCKET: &str = "corral-dist";
const SUPPORTED_ARCHES: &[&str] = &[AMD64, ARM64, I386, PPC64EL];

/// Builds the API client for a configuration
pub type ApiFactory = Arc<dyn Fn(&EnvironConfig) -> Arc<dyn OpenStackApi> + Send + Sync>;

/// Clients driving the `openstack` CLI
pub fn cli_factory() -> ApiFactory {
    Arc::new(|ecfg: &EnvironConfig| -> Arc<dyn OpenStackApi> {
        Arc::new(OpenStackCli::new(ecfg.credentials(), ecfg.auth_mode()))
    })
}

struct Snapshot {
    ecfg: EnvironConfig,
    api: Arc<dyn OpenStackApi>,
    storage: Arc<SwiftStorage>,
    public_storage: Option<Arc<PublicStorage>>,
}

impl Snapshot {
    fn new(ecfg: EnvironConfig, factory: &ApiFactory) -> Self {
        let api = factory(&ecfg);
        let storage = Arc::new(SwiftStorage::new(api.clone(), ecfg.control_bucket()));
        let public_storage = (!ecfg.public_bucket_url().is_empty()).then(|| {
            let bucket = match ecfg.public_bucket() {
                "" => DEFAULT_PUBLIC_BUCKET,
                bucket => bucket,
            };
            Arc::new(PublicStorage::new(format!(
                "{}/{}",
                ecfg.public_bucket_url().trim_end_matches('/'),
                bucket
            )))
        });
        Self {
            ecfg,
            api,
            storage,
            public_storage,
        }
    }

    fn machine_name(&self, machine_id: &str) -> String {
        machine_name(self.ecfg.name(), machine_id)
    }

    fn machines_filter(&self) -> String {
        machines_filter(self.ecfg.name())
    }

    fn instance(self: &Arc<Self>, server: Server) -> Arc<dyn Instance> {
        Arc::new(OpenStackInstance::new(server, self.clone()))
    }

    async fn launch(
        self: &Arc<Self>,
        params: StartInstanceParams,
    ) -> Result<(Arc<dyn Instance>, String)> {
        let series = match params.tools.all_series().as_slice() {
            [series] => series.clone(),
            [] => return Err(CloudError::InvalidConfig("no tools to start instance with".into())),
            many => {
                return Err(CloudError::InvalidConfig(format!(
                    "expected single series, got {:?}",
                    many
                )));
            }
        };
        let arches = params.tools.arches();
        if series == "unknown" || arches.iter().any(|a| a == "unknown") {
            return Err(CloudError::InvalidConfig(format!(
                "cannot start instance with tools for unknown series or architecture ({}/{})",
                series,
                arches.join(",")
            )));
        }

        let public_ip = if params.with_public_ip {
            Some(self.allocate_public_ip().await?)
        } else {
            None
        };

        let assign = public_ip.as_ref().map(|(ip, _)| ip);
        match self.launch_server(params, series, arches, assign).await {
            Ok(launched) => Ok(launched),
            Err(e) => {
                if let Some((ip, true)) = &public_ip {
                    self.release_ip_after_failure(ip).await;
                }
                Err(e)
            }
        }
    }

    async fn launch_server(
        self: &Arc<Self>,
        params: StartInstanceParams,
        series: String,
        arches: Vec<String>,
        public_ip: Option<&FloatingIp>,
    ) -> Result<(Arc<dyn Instance>, String)> {
        let flavors = self.api.list_flavors().await?;
        let spec = find_instance_spec(
            &params.image_metadata,
            &flavors,
            &InstanceConstraint {
                region: self.ecfg.region().to_string(),
                series: series.clone(),
                arches,
                constraints: params.constraints.clone(),
                default_instance_type: Some(DEFAULT_INSTANCE_TYPE.to_string()),
            },
        )?;
        let tools = params.tools.matching(&ToolsFilter {
            arch: Some(spec.image.arch.clone()),
            ..Default::default()
        })?;

        let mut icfg = params.instance_config;
        icfg.tools = tools.first().cloned();
        let user_data = gzip(icfg.cloud_init()?.as_bytes())?;

        let groups = set_up_groups(
            self.api.as_ref(),
            self.ecfg.name(),
            &params.machine_id,
            self.ecfg.config().firewall_mode(),
        )
        .await
        .map_err(|e| CloudError::from(e).context("cannot set up groups"))?;

        let opts = RunServerOpts {
            name: self.machine_name(&params.machine_id),
            flavor_id: spec.instance_type.id.clone(),
            image_id: spec.image.id.clone(),
            user_data,
            security_groups: groups.into_iter().map(|g| g.name).collect(),
        };
        let server_id = self.run_server(&opts).await?;

        let server = match self.api.get_server(&server_id).await {
            Ok(server) => server,
            Err(e) => {
                self.terminate_after_failure(&server_id).await;
                return Err(CloudError::from(e).context("cannot get started instance"));
            }
        };
        tracing::info!(
            "Started instance {} ({}) with image {} and flavor {}",
            server_id,
            opts.name,
            spec.image.id,
            spec.instance_type.name
        );

        if let Some(ip) = public_ip {
            if let Err(e) = self.assign_public_ip(ip, &server_id).await {
                self.terminate_after_failure(&server_id).await;
                return Err(e.context(format!(
                    "cannot assign public address {} to instance {}",
                    ip.ip, server_id
                )));
            }
            tracing::info!("Assigned public IP {} to {}", ip.ip, server_id);
        }

        Ok((self.instance(server), spec.image.arch))
    }

    /// Reuse an unassigned floating IP, or allocate one. The flag is set
    /// when the IP was allocated here.
    async fn allocate_public_ip(&self) -> Result<(FloatingIp, bool)> {
        let ips = self.api.list_floating_ips().await?;
        if let Some(free) = ips.into_iter().find(|ip| ip.instance_id.is_none()) {
            tracing::debug!("Reusing floating IP {}", free.ip);
            return Ok((free, false));
        }
        let ip = self
            .api
            .allocate_floating_ip(self.ecfg.external_network())
            .await
            .map_err(|e| CloudError::from(e).context("cannot allocate a public IP"))?;
        tracing::debug!("Allocated floating IP {}", ip.ip);
        Ok((ip, true))
    }

    async fn release_ip_after_failure(&self, ip: &FloatingIp) {
        match self.api.release_floating_ip(&ip.id).await {
            Ok(()) => tracing::debug!("Released floating IP {}", ip.ip),
            Err(e) => tracing::warn!("Failed to release floating IP {}: {}", ip.ip, e),
        }
    }

    /// Assigning fails until the server is far enough along, so keep
    /// trying for the long attempt.
    async fn assign_public_ip(&self, ip: &FloatingIp, server_id: &str) -> Result<()> {
        let mut attempt = LONG_ATTEMPT.start();
        let mut last_error = None;
        while attempt.next().await {
            match self.api.add_server_floating_ip(server_id, &ip.ip).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("Assigning {} to {}: {}", ip.ip, server_id, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map_or_else(
            || CloudError::Timeout(format!("assigning {}", ip.ip)),
            CloudError::from,
        ))
    }

    /// Run the server, retrying while the cloud reports something it
    /// needs as not found yet.
    async fn run_server(&self, opts: &RunServerOpts) -> Result<String> {
        let mut attempt = SHORT_ATTEMPT.start();
        let mut last_error = None;
        while attempt.next().await {
            match self.api.run_server(opts).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Run server {}: {}, retrying", opts.name, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(CloudError::from(e).context("cannot run instance")),
            }
        }
        Err(last_error
            .map_or_else(
                || CloudError::Timeout(format!("running {}", opts.name)),
                CloudError::from,
            )
            .context("cannot run instance"))
    }

    async fn terminate_after_failure(&self, server_id: &str) {
        if let Err(e) = self.terminate(&[InstanceId::from(server_id)]).await {
            tracing::warn!("Failed to terminate instance {}: {}", server_id, e);
        }
    }

    /// Delete every server, treating already deleted ones as done.
    /// Returns the first failure after trying them all.
    async fn terminate(&self, ids: &[InstanceId]) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            match self.api.delete_server(id.as_str()).await {
                Ok(()) => tracing::debug!("Terminated instance {}", id),
                Err(e) if e.is_not_found() => tracing::debug!("Instance {} already gone", id),
                Err(e) => {
                    tracing::warn!("Cannot terminate instance {}: {}", id, e);
                    if first_error.is_none() {
                        first_error = Some(
                            CloudError::from(e).context(format!("cannot terminate instance {}", id)),
                        );
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Add the live servers among `ids` that are not in `found` yet.
    async fn collect_instances(
        &self,
        ids: &[InstanceId],
        found: &mut BTreeMap<String, Server>,
    ) -> Result<()> {
        let missing: Vec<&InstanceId> = ids
            .iter()
            .filter(|id| !found.contains_key(id.as_str()))
            .collect();
        match missing.as_slice() {
            [] => {}
            [id] => match self.api.get_server(id.as_str()).await {
                Ok(server) if server.is_live() => {
                    found.insert(server.id.clone(), server);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            },
            _ => {
                for server in self.api.list_servers(&self.machines_filter()).await? {
                    if server.is_live() && missing.iter().any(|id| id.as_str() == server.id) {
                        found.insert(server.id.clone(), server);
                    }
                }
            }
        }
        Ok(())
    }

    async fn instances(self: &Arc<Self>, ids: &[InstanceId]) -> Result<InstanceLookup> {
        if ids.is_empty() {
            return Ok(InstanceLookup {
                instances: Vec::new(),
            });
        }
        let mut found = BTreeMap::new();
        let mut attempt = SHORT_ATTEMPT.start();
        while attempt.next().await {
            self.collect_instances(ids, &mut found).await?;
            if ids.iter().all(|id| found.contains_key(id.as_str())) {
                break;
            }
        }
        if found.is_empty() {
            return Err(CloudError::NoInstances);
        }
        let instances = ids
            .iter()
            .map(|id| found.get(id.as_str()).map(|s| self.instance(s.clone())))
            .collect();
        Ok(InstanceLookup { instances })
    }

    async fn all_instances(self: &Arc<Self>) -> Result<Vec<Arc<dyn Instance>>> {
        let servers = self.api.list_servers(&self.machines_filter()).await?;
        Ok(servers
            .into_iter()
            .filter(Server::is_live)
            .map(|s| self.instance(s))
            .collect())
    }

    /// Refuse to bootstrap over existing state. A just-deleted state
    /// object can stay readable for a while, so only give up once it has
    /// been there for the whole short attempt.
    async fn ensure_state_absent(&self) -> Result<()> {
        let mut attempt = SHORT_ATTEMPT.start();
        while attempt.next().await {
            match load_state(self.storage.as_ref()).await {
                Err(CloudError::NotBootstrapped) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(CloudError::AlreadyBootstrapped)
    }

    async fn controller_instances(&self) -> Result<Vec<InstanceId>> {
        let state = load_state(self.storage.as_ref()).await?;
        if state.state_instances.is_empty() {
            return Err(CloudError::NoInstances);
        }
        Ok(state.state_instances)
    }
}

pub(crate) fn machine_name(env_name: &str, machine_id: &str) -> String {
    format!("corral-{}-{}", env_name, machine_tag(machine_id))
}

pub(crate) fn machines_filter(env_name: &str) -> String {
    format!("corral-{}-.*", regex::escape(env_name))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// A server in the environment
pub struct OpenStackInstance {
    server: Server,
    snapshot: Arc<Snapshot>,
    address: Mutex<Option<String>>,
}

impl OpenStackInstance {
    fn new(server: Server, snapshot: Arc<Snapshot>) -> Self {
        Self {
            server,
            snapshot,
            address: Mutex::new(None),
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn status(&self) -> &str {
        &self.server.status
    }
}

impl std::fmt::Debug for OpenStackInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStackInstance")
            .field("id", &self.server.id)
            .field("name", &self.server.name)
            .field("status", &self.server.status)
            .finish()
    }
}

#[async_trait]
impl Instance for OpenStackInstance {
    fn id(&self) -> InstanceId {
        InstanceId::from(self.server.id.as_str())
    }

    async fn dns_name(&self) -> Result<String> {
        if let Some(addr) = self
            .address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Ok(addr);
        }
        let server = self.snapshot.api.get_server(&self.server.id).await?;
        let addr = instance_address(&server.addresses)?;
        *self.address.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr.clone());
        Ok(addr)
    }
}

/// An environment on an OpenStack cloud
pub struct OpenStackEnviron {
    snapshot: RwLock<Arc<Snapshot>>,
    factory: ApiFactory,
}

impl OpenStackEnviron {
    pub fn new(cfg: Config, factory: ApiFactory) -> Result<Self> {
        let ecfg = EnvironConfig::new(cfg)?;
        let snapshot = Snapshot::new(ecfg, &factory);
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            factory,
        })
    }

    /// An environment whose snapshots all share `api`
    pub fn with_api(cfg: Config, api: Arc<dyn OpenStackApi>) -> Result<Self> {
        Self::new(cfg, Arc::new(move |_: &EnvironConfig| api.clone()))
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn environ_config(&self) -> EnvironConfig {
        self.snapshot().ecfg.clone()
    }

    /// The public bucket published tools can be read from, if configured
    pub fn public_storage(&self) -> Option<Arc<dyn Storage>> {
        self.snapshot()
            .public_storage
            .clone()
            .map(|s| s as Arc<dyn Storage>)
    }

    /// Addresses agents use to reach the controller: the state server and
    /// API server on every controller with an address.
    pub async fn state_info(&self) -> Result<(ConnectionInfo, ConnectionInfo)> {
        let snap = self.snapshot();
        let ca_cert = snap
            .ecfg
            .config()
            .ca_cert()
            .ok_or_else(|| {
                CloudError::InvalidConfig("no CA certificate in environment configuration".into())
            })?
            .to_string();
        let ids = snap.controller_instances().await?;

        let mut attempt = LONG_ATTEMPT.start();
        while attempt.next().await {
            let lookup = match snap.instances(&ids).await {
                Ok(lookup) => lookup,
                Err(CloudError::NoInstances) => continue,
                Err(e) => return Err(e),
            };
            let mut hosts = Vec::new();
            for instance in lookup.found() {
                match instance.dns_name().await {
                    Ok(host) => hosts.push(host),
                    Err(CloudError::NoDnsName) => {}
                    Err(e) => return Err(e),
                }
            }
            if hosts.is_empty() {
                continue;
            }
            let info = |port: u16| ConnectionInfo {
                addrs: hosts.iter().map(|h| format!("{}:{}", h, port)).collect(),
                ca_cert: ca_cert.clone(),
                ..Default::default()
            };
            return Ok((info(STATE_PORT), info(API_PORT)));
        }
        Err(CloudError::Timeout(
            "timed out waiting for controller addresses".into(),
        ))
    }
}

#[async_trait]
impl Environ for OpenStackEnviron {
    fn name(&self) -> String {
        self.snapshot().ecfg.name().to_string()
    }

    fn config(&self) -> Config {
        self.snapshot().ecfg.config().clone()
    }

    fn set_config(&self, cfg: Config) -> Result<()> {
        let ecfg = EnvironConfig::new(cfg)?;
        let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        current.ecfg.validate_change(&ecfg)?;
        *current = Arc::new(Snapshot::new(ecfg, &self.factory));
        Ok(())
    }

    fn constraints_validator(&self) -> Validator {
        let mut validator = Validator::new();
        validator.register_conflicts(
            &[constraints::INSTANCE_TYPE],
            &[constraints::MEM, constraints::CPU_CORES, constraints::CPU_POWER],
        );
        validator.register_unsupported(&[constraints::CPU_POWER, constraints::TAGS]);
        validator.register_vocabulary(constraints::ARCH, self.supported_architectures());
        validator
    }

    fn supported_architectures(&self) -> Vec<String> {
        SUPPORTED_ARCHES.iter().map(|a| a.to_string()).collect()
    }

    fn region(&self) -> Option<CloudSpec> {
        let snap = self.snapshot();
        Some(CloudSpec::new(snap.ecfg.region(), snap.ecfg.auth_url()))
    }

    fn storage(&self) -> Arc<dyn Storage> {
        self.snapshot().storage.clone()
    }

    async fn bootstrap(&self, params: EnvironBootstrapParams) -> Result<BootstrapResult> {
        let snap = self.snapshot();
        snap.ensure_state_absent().await?;

        let cfg = snap.ecfg.config();
        let series = params
            .series
            .clone()
            .or_else(|| cfg.default_series().map(str::to_string))
            .unwrap_or_else(|| LATEST_LTS_SERIES.to_string());
        let tools = params
            .available_tools
            .matching(&ToolsFilter {
                series: Some(series.clone()),
                arch: params.constraints.arch.clone(),
                ..Default::default()
            })
            .map_err(|_| CloudError::NotFound(format!("tools for series {:?}", series)))?;

        let icfg = corral_cloud::InstanceConfig::new_bootstrap(
            cfg,
            params.constraints.clone(),
            params.environ_constraints,
            series.clone(),
            None,
        )?;
        tracing::info!("Starting bootstrap instance for {:?}", snap.ecfg.name());
        let (instance, arch) = snap
            .launch(StartInstanceParams {
                machine_id: "0".to_string(),
                constraints: params.constraints,
                tools,
                instance_config: icfg,
                image_metadata: params.image_metadata,
                placement: params.placement,
                with_public_ip: true,
            })
            .await
            .map_err(|e| e.context("cannot start bootstrap instance"))?;

        let state = BootstrapState {
            state_instances: vec![instance.id()],
        };
        if let Err(e) = save_state(snap.storage.as_ref(), &state).await {
            snap.terminate_after_failure(instance.id().as_str()).await;
            return Err(e.context("cannot save state"));
        }

        Ok(BootstrapResult {
            arch,
            series,
            finalizer: Box::new(SshFinalizer::new(instance)),
        })
    }

    async fn controller_instances(&self) -> Result<Vec<InstanceId>> {
        self.snapshot().controller_instances().await
    }

    async fn start_instance(&self, params: StartInstanceParams) -> Result<Arc<dyn Instance>> {
        let (instance, _) = self.snapshot().launch(params).await?;
        Ok(instance)
    }

    async fn instances(&self, ids: &[InstanceId]) -> Result<InstanceLookup> {
        self.snapshot().instances(ids).await
    }

    async fn all_instances(&self) -> Result<Vec<Arc<dyn Instance>>> {
        self.snapshot().all_instances().await
    }

    async fn stop_instances(&self, ids: &[InstanceId]) -> Result<()> {
        self.snapshot().terminate(ids).await
    }

    async fn destroy(&self, ensure: &[InstanceId]) -> Result<()> {
        let snap = self.snapshot();
        tracing::info!("Destroying environment {:?}", snap.ecfg.name());
        let mut ids: Vec<InstanceId> = snap
            .all_instances()
            .await?
            .iter()
            .map(|i| i.id())
            .collect();
        for id in ensure {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        snap.terminate(&ids).await?;
        snap.storage.remove_all().await
    }
}
