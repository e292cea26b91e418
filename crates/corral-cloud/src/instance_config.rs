//! Machine provisioning configuration
//!
//! An [`InstanceConfig`] holds everything needed to turn a freshly started
//! machine into an agent host. It renders either as a cloud-init document,
//! handed to the cloud as user data when the machine starts, or as a plain
//! provisioning script pushed over SSH when a bootstrap is finalised.

use crate::error::{CloudError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use corral_config::{Config, split_authorized_keys};
use corral_core::constraints::Value;
use corral_core::{ImageMetadata, Tools};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;

pub const DEFAULT_DATA_DIR: &str = "/var/lib/corral";
pub const STATE_PORT: u16 = 37017;
pub const API_PORT: u16 = 17070;

const PASSWORD_SALT: &[u8] = b"\x75\x82\x81\xca";

/// Hash an admin secret the way agents expect to find it.
pub fn password_hash(password: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(PASSWORD_SALT);
    hasher.update(password.as_bytes());
    let mut encoded = STANDARD.encode(hasher.finalize());
    encoded.truncate(24);
    encoded
}

/// `machine-<id>`, with container separators flattened
pub fn machine_tag(machine_id: &str) -> String {
    format!("machine-{}", machine_id.replace('/', "-"))
}

/// Where and how an agent connects to the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionInfo {
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default)]
    pub ca_cert: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    pub machine_id: String,
    pub controller: bool,
    pub series: String,
    pub tools: Option<Tools>,
    pub authorized_keys: String,
    pub state_info: ConnectionInfo,
    pub api_info: ConnectionInfo,

    /// PEM certificate and key served by the controller
    pub controller_cert: Option<String>,
    pub controller_key: Option<String>,

    pub bootstrap_constraints: Value,
    pub environ_constraints: Value,

    /// Environment attributes handed to the first controller
    pub environ_config: BTreeMap<String, serde_yaml::Value>,

    /// Image records the controller should serve in addition to the
    /// published ones
    pub custom_image_metadata: Vec<ImageMetadata>,
    pub public_signing_key: Option<String>,

    pub data_dir: String,
    pub agent_environment: BTreeMap<String, String>,
    pub provider_type: String,
}

impl InstanceConfig {
    /// Configuration for an ordinary machine joining a running environment
    pub fn new(
        machine_id: impl Into<String>,
        series: impl Into<String>,
        state_info: ConnectionInfo,
        api_info: ConnectionInfo,
    ) -> Self {
        let machine_id = machine_id.into();
        let tag = machine_tag(&machine_id);
        Self {
            machine_id,
            controller: false,
            series: series.into(),
            tools: None,
            authorized_keys: String::new(),
            state_info: ConnectionInfo {
                tag: tag.clone(),
                ..state_info
            },
            api_info: ConnectionInfo { tag, ..api_info },
            controller_cert: None,
            controller_key: None,
            bootstrap_constraints: Value::default(),
            environ_constraints: Value::default(),
            environ_config: BTreeMap::new(),
            custom_image_metadata: Vec::new(),
            public_signing_key: None,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            agent_environment: BTreeMap::new(),
            provider_type: String::new(),
        }
    }

    /// Configuration for machine 0, the first controller
    pub fn new_bootstrap(
        cfg: &Config,
        bootstrap_constraints: Value,
        environ_constraints: Value,
        series: impl Into<String>,
        public_signing_key: Option<String>,
    ) -> Result<Self> {
        let ca_cert = cfg
            .ca_cert()
            .ok_or_else(|| CloudError::InvalidConfig("no CA certificate in environment configuration".into()))?;
        let password = password_hash(cfg.admin_secret());
        let info = ConnectionInfo {
            addrs: Vec::new(),
            ca_cert: ca_cert.to_string(),
            tag: String::new(),
            password,
        };
        let mut icfg = InstanceConfig::new("0", series, info.clone(), info);
        icfg.controller = true;
        icfg.authorized_keys = cfg.authorized_keys().to_string();
        // The first controller serves with the environment's CA identity
        // until it issues its own certificate.
        icfg.controller_cert = Some(ca_cert.to_string());
        icfg.controller_key = cfg.ca_private_key().map(str::to_string);
        icfg.bootstrap_constraints = bootstrap_constraints;
        icfg.environ_constraints = environ_constraints;
        icfg.environ_config = cfg.attrs().clone();
        icfg.public_signing_key = public_signing_key;
        icfg.provider_type = cfg.provider_type().to_string();
        Ok(icfg)
    }

    pub fn tag(&self) -> String {
        machine_tag(&self.machine_id)
    }

    fn tools_dir(&self, tools: &Tools) -> String {
        format!("{}/tools/{}", self.data_dir, tools.version)
    }

    fn agent_dir(&self) -> String {
        format!("{}/agents/{}", self.data_dir, self.tag())
    }

    /// Check that the configuration is complete enough to render.
    pub fn verify(&self) -> Result<()> {
        let invalid = |what: &str| {
            Err(CloudError::InvalidConfig(format!(
                "invalid machine configuration: {}",
                what
            )))
        };
        if self.machine_id.is_empty() {
            return invalid("missing machine id");
        }
        if self.data_dir.is_empty() {
            return invalid("missing data directory");
        }
        if self.tools.is_none() {
            return invalid("missing tools");
        }
        if self.state_info.ca_cert.is_empty() {
            return invalid("missing CA certificate");
        }
        if self.controller {
            if self.controller_cert.as_deref().unwrap_or_default().is_empty() {
                return invalid("missing controller certificate");
            }
            if self.controller_key.as_deref().unwrap_or_default().is_empty() {
                return invalid("missing controller private key");
            }
        } else {
            if self.state_info.addrs.is_empty() {
                return invalid("missing state hosts");
            }
            if self.api_info.addrs.is_empty() {
                return invalid("missing API hosts");
            }
        }
        Ok(())
    }

    /// Render the cloud-init user data for this machine.
    ///
    /// A bootstrap machine only gets its SSH keys; the rest of its
    /// provisioning happens once it is reachable.
    pub fn cloud_init(&self) -> Result<String> {
        let mut doc = serde_yaml::Mapping::new();
        let keys: Vec<serde_yaml::Value> = split_authorized_keys(&self.authorized_keys)
            .into_iter()
            .map(serde_yaml::Value::from)
            .collect();
        if !keys.is_empty() {
            doc.insert("ssh_authorized_keys".into(), keys.into());
        }

        if !self.controller {
            self.verify()?;
            let script_path = format!("{}/provision.sh", self.data_dir);
            let mut file = serde_yaml::Mapping::new();
            file.insert("path".into(), script_path.clone().into());
            file.insert("permissions".into(), "0700".into());
            file.insert("content".into(), self.provisioning_script(None)?.into());
            doc.insert(
                "write_files".into(),
                serde_yaml::Value::Sequence(vec![file.into()]),
            );
            doc.insert(
                "runcmd".into(),
                serde_yaml::Value::Sequence(vec![format!("bash {}", script_path).into()]),
            );
        }

        let body = serde_yaml::to_string(&doc)?;
        Ok(format!("#cloud-config\n{}", body))
    }

    /// Render the shell script that installs the tools and starts the
    /// machine agent.
    ///
    /// `local_tools` carries the tarball bytes when the tools only exist on
    /// the client (a `file://` URL); they are embedded in the script.
    pub fn provisioning_script(&self, local_tools: Option<&[u8]>) -> Result<String> {
        self.verify()?;
        let tools = self
            .tools
            .as_ref()
            .ok_or_else(|| CloudError::InvalidConfig("invalid machine configuration: missing tools".into()))?;
        let bin = self.tools_dir(tools);
        let agent_dir = self.agent_dir();

        let mut s = vec![
            "#!/bin/bash".to_string(),
            "set -e".to_string(),
            String::new(),
            format!("echo '=== Corral: provisioning {} ==='", self.tag()),
            format!("mkdir -p {}", shquote(&bin)),
        ];

        match local_tools {
            Some(bytes) => s.push(format!(
                "printf %s {} | base64 -d > {}/tools.tar.gz",
                shquote(&STANDARD.encode(bytes)),
                shquote(&bin)
            )),
            None => s.push(format!(
                "curl -sSfL --retry 10 -o {}/tools.tar.gz {}",
                shquote(&bin),
                shquote(&tools.url)
            )),
        }
        if !tools.sha256.is_empty() {
            s.push(format!(
                "echo {}  {}/tools.tar.gz | sha256sum -c - || (echo 'tools checksum mismatch'; exit 1)",
                shquote(&tools.sha256),
                shquote(&bin)
            ));
        }
        s.push(format!("tar zxf {0}/tools.tar.gz -C {0}", shquote(&bin)));
        s.push(format!(
            "printf %s {} > {}/downloaded-tools.txt",
            shquote(&serde_json::to_string(tools)?),
            shquote(&bin)
        ));
        s.push(format!(
            "ln -sfn {} {}",
            shquote(&bin),
            shquote(&format!("{}/tools/{}", self.data_dir, self.tag()))
        ));

        s.push(format!("mkdir -p {}", shquote(&agent_dir)));
        write_file(&mut s, &format!("{}/agent.conf", agent_dir), &self.agent_conf()?, "0600");

        if self.controller {
            let pem = format!(
                "{}\n{}\n",
                self.controller_cert.as_deref().unwrap_or_default().trim_end(),
                self.controller_key.as_deref().unwrap_or_default().trim_end()
            );
            write_file(&mut s, &format!("{}/server.pem", self.data_dir), &pem, "0600");

            if !self.custom_image_metadata.is_empty() {
                let images = serde_json::to_string_pretty(&self.custom_image_metadata)?;
                let dir = format!("{}/simplestreams/images", self.data_dir);
                s.push(format!("mkdir -p {}", shquote(&dir)));
                write_file(&mut s, &format!("{}/released.json", dir), &images, "0644");
            }
            if let Some(key) = &self.public_signing_key {
                let dir = format!("{}/simplestreams", self.data_dir);
                s.push(format!("mkdir -p {}", shquote(&dir)));
                write_file(&mut s, &format!("{}/publickey.asc", dir), key, "0644");
            }

            let environ = STANDARD.encode(serde_yaml::to_string(&self.environ_config)?);
            s.push(format!(
                "{}/corral-agent bootstrap-state --data-dir {} --environ-config {} --bootstrap-constraints {} --environ-constraints {}",
                shquote(&bin),
                shquote(&self.data_dir),
                shquote(&environ),
                shquote(&self.bootstrap_constraints.to_string()),
                shquote(&self.environ_constraints.to_string()),
            ));
        }

        let unit = format!("corral-{}", self.tag());
        let service = format!(
            "[Unit]\nDescription=Corral agent for {tag}\nAfter=network-online.target\n\n\
             [Service]\nExecStart={bin}/corral-agent machine --data-dir {dir} --machine-id {id}\nRestart=on-failure\n\n\
             [Install]\nWantedBy=multi-user.target\n",
            tag = self.tag(),
            bin = bin,
            dir = self.data_dir,
            id = self.machine_id,
        );
        write_file(&mut s, &format!("/etc/systemd/system/{}.service", unit), &service, "0644");
        s.push(format!("systemctl enable --now {}", shquote(&unit)));
        s.push(String::new());
        s.push(format!("echo '=== Corral: {} provisioned ==='", self.tag()));

        Ok(s.join("\n") + "\n")
    }

    fn agent_conf(&self) -> Result<String> {
        #[derive(Serialize)]
        #[serde(rename_all = "kebab-case")]
        struct AgentConf<'a> {
            tag: String,
            data_dir: &'a str,
            upgraded_to_version: String,
            provider_type: &'a str,
            state: &'a ConnectionInfo,
            api: &'a ConnectionInfo,
            #[serde(skip_serializing_if = "BTreeMap::is_empty")]
            values: &'a BTreeMap<String, String>,
        }

        let conf = AgentConf {
            tag: self.tag(),
            data_dir: &self.data_dir,
            upgraded_to_version: self
                .tools
                .as_ref()
                .map(|t| t.number().to_string())
                .unwrap_or_default(),
            provider_type: &self.provider_type,
            state: &self.state_info,
            api: &self.api_info,
            values: &self.agent_environment,
        };
        Ok(serde_yaml::to_string(&conf)?)
    }
}

fn write_file(script: &mut Vec<String>, path: &str, content: &str, mode: &str) {
    script.push(format!("install -D -m {} /dev/null {}", mode, shquote(path)));
    script.push(format!("printf '%s\\n' {} > {}", shquote(content.trim_end()), shquote(path)));
}

/// Quote `s` for a POSIX shell.
pub fn shquote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
