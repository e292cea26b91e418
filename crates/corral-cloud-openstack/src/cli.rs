//! openstack CLI wrapper
//!
//! Drives python-openstackclient with `-f json` output. Credentials are
//! passed through the `OS_*` environment of each child process rather than
//! on the command line.

use crate::api::{
    Addresses, FloatingIp, IpAddress, OpenStackApi, RuleInfo, RunServerOpts, SecurityGroup, Server,
};
use crate::config::{AuthMode, Credentials};
use crate::error::{OpenStackError, Result};
use async_trait::async_trait;
use corral_cloud::InstanceType;
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// openstack CLI wrapper
pub struct OpenStackCli {
    credentials: Credentials,
    auth_mode: AuthMode,
}

impl OpenStackCli {
    pub fn new(credentials: Credentials, auth_mode: AuthMode) -> Self {
        Self {
            credentials,
            auth_mode,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("openstack");
        cmd.env("OS_AUTH_URL", &self.credentials.auth_url)
            .env("OS_USERNAME", &self.credentials.username)
            .env("OS_PASSWORD", &self.credentials.password)
            .env("OS_TENANT_NAME", &self.credentials.tenant_name)
            .env("OS_PROJECT_NAME", &self.credentials.tenant_name)
            .env("OS_REGION_NAME", &self.credentials.region);
        if self.auth_mode == AuthMode::UserPass {
            cmd.env("OS_AUTH_TYPE", "password");
        }
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Run an openstack command and return raw stdout
    async fn run_raw(&self, args: &[&str]) -> Result<Vec<u8>> {
        tracing::debug!("Running: openstack {}", args.join(" "));

        let output = match self.command(args).output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OpenStackError::ClientNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }

        Ok(output.stdout)
    }

    /// Run an openstack command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run_raw(args).await?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }

    /// Run an openstack command with `-f json` and parse its output
    async fn run_json<T: serde::de::DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let mut args = args.to_vec();
        args.extend(["-f", "json"]);
        let output = self.run_command(&args).await?;
        let output = if output.trim().is_empty() { "[]" } else { output.trim() };
        Ok(serde_json::from_str(output)?)
    }
}

/// Map a failed command's stderr to an error kind
fn classify_failure(stderr: &str) -> OpenStackError {
    let lower = stderr.to_lowercase();
    if lower.contains("already exists") || lower.contains("http 409") || lower.contains("conflict") {
        OpenStackError::Duplicate(stderr.to_string())
    } else if lower.contains("not found")
        || lower.contains("http 404")
        || (lower.starts_with("no ") && lower.contains("found"))
        || lower.contains("no server with a name or id")
    {
        OpenStackError::NotFound(stderr.to_string())
    } else {
        OpenStackError::CommandFailed(stderr.to_string())
    }
}

/// Parse the networks of a server, as either a JSON object
/// (`{"net": ["10.0.0.3", "1.2.3.4"]}`) or the older string form
/// (`net=10.0.0.3, 1.2.3.4; other=...`).
fn parse_networks(value: &Value) -> Addresses {
    let mut addresses = Addresses::new();
    match value {
        Value::Object(map) => {
            for (net, ips) in map {
                let ips = match ips {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(IpAddress::parse(s)),
                            Value::Object(o) => o
                                .get("addr")
                                .and_then(Value::as_str)
                                .map(IpAddress::parse),
                            _ => None,
                        })
                        .collect(),
                    Value::String(s) => vec![IpAddress::parse(s)],
                    _ => Vec::new(),
                };
                addresses.insert(net.clone(), ips);
            }
        }
        Value::String(s) => {
            for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                if let Some((net, ips)) = part.split_once('=') {
                    let ips = ips
                        .split(',')
                        .map(str::trim)
                        .filter(|ip| !ip.is_empty())
                        .map(IpAddress::parse)
                        .collect();
                    addresses.insert(net.trim().to_string(), ips);
                }
            }
        }
        _ => {}
    }
    addresses
}

/// A server as printed by `server list` (capitalised keys) or
/// `server show` (lowercase keys)
#[derive(Debug, Deserialize)]
struct ServerRow {
    #[serde(alias = "ID")]
    id: String,
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "Status")]
    status: String,
    #[serde(default, alias = "Networks", alias = "addresses")]
    networks: Value,
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Server {
            addresses: parse_networks(&row.networks),
            id: row.id,
            name: row.name,
            status: row.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlavorRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    /// MiB
    #[serde(rename = "RAM")]
    ram: u64,
    /// GiB
    #[serde(rename = "Disk")]
    disk: u64,
    #[serde(rename = "VCPUs")]
    vcpus: u64,
}

impl From<FlavorRow> for InstanceType {
    fn from(row: FlavorRow) -> Self {
        InstanceType {
            id: row.id,
            name: row.name,
            mem: row.ram,
            cpu_cores: row.vcpus,
            root_disk: row.disk * 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FloatingIpRow {
    #[serde(alias = "ID")]
    id: String,
    #[serde(alias = "Floating IP Address")]
    floating_ip_address: String,
    #[serde(default, alias = "Port")]
    port_id: Option<String>,
}

impl From<FloatingIpRow> for FloatingIp {
    fn from(row: FloatingIpRow) -> Self {
        FloatingIp {
            id: row.id,
            ip: row.floating_ip_address,
            instance_id: row.port_id.filter(|p| !p.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Find the public object-store endpoint in `catalog show` output.
fn object_store_endpoint(catalog: &Value, region: &str) -> Option<String> {
    match catalog.get("endpoints")? {
        Value::Array(endpoints) => {
            let public = |e: &&Value| e.get("interface").and_then(Value::as_str) == Some("public");
            let in_region = |e: &&Value| e.get("region").and_then(Value::as_str) == Some(region);
            endpoints
                .iter()
                .filter(public)
                .find(in_region)
                .or_else(|| endpoints.iter().find(public))
                .and_then(|e| e.get("url").and_then(Value::as_str))
                .map(|url| url.trim_end_matches('/').to_string())
        }
        Value::String(text) => text
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("public: "))
            .map(|url| url.trim().trim_end_matches('/').to_string()),
        _ => None,
    }
}

/// Write `data` to a temporary file for commands that only take paths
fn scratch_file(data: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

fn path_str(file: &tempfile::NamedTempFile) -> Result<String> {
    file.path()
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| OpenStackError::UnexpectedOutput("non UTF-8 temporary path".into()))
}

#[async_trait]
impl OpenStackApi for OpenStackCli {
    async fn list_servers(&self, name: &str) -> Result<Vec<Server>> {
        let rows: Vec<ServerRow> = self.run_json(&["server", "list", "--name", name]).await?;
        Ok(rows.into_iter().map(Server::from).collect())
    }

    async fn get_server(&self, id: &str) -> Result<Server> {
        let row: ServerRow = self.run_json(&["server", "show", id]).await?;
        Ok(row.into())
    }

    async fn run_server(&self, opts: &RunServerOpts) -> Result<String> {
        let user_data = scratch_file(&opts.user_data)?;
        let user_data_path = path_str(&user_data)?;

        let mut args = vec![
            "server",
            "create",
            "--flavor",
            opts.flavor_id.as_str(),
            "--image",
            opts.image_id.as_str(),
            "--user-data",
            user_data_path.as_str(),
        ];
        for group in &opts.security_groups {
            args.push("--security-group");
            args.push(group.as_str());
        }
        args.push(opts.name.as_str());

        let created: Created = self.run_json(&args).await?;
        Ok(created.id)
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "delete", id]).await?;
        Ok(())
    }

    async fn list_flavors(&self) -> Result<Vec<InstanceType>> {
        let rows: Vec<FlavorRow> = self.run_json(&["flavor", "list", "--long"]).await?;
        Ok(rows.into_iter().map(InstanceType::from).collect())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        let rows: Vec<FloatingIpRow> = self.run_json(&["floating", "ip", "list"]).await?;
        Ok(rows.into_iter().map(FloatingIp::from).collect())
    }

    async fn allocate_floating_ip(&self, network: &str) -> Result<FloatingIp> {
        let row: FloatingIpRow = self.run_json(&["floating", "ip", "create", network]).await?;
        Ok(row.into())
    }

    async fn add_server_floating_ip(&self, server_id: &str, ip: &str) -> Result<()> {
        self.run_command(&["server", "add", "floating", "ip", server_id, ip])
            .await?;
        Ok(())
    }

    async fn release_floating_ip(&self, id: &str) -> Result<()> {
        self.run_command(&["floating", "ip", "delete", id]).await?;
        Ok(())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecurityGroup> {
        // Neutron accepts duplicate names, so look first.
        match self.security_group_by_name(name).await {
            Ok(_) => return Err(OpenStackError::Duplicate(format!("security group {:?}", name))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.run_json(&["security", "group", "create", name, "--description", description])
            .await
    }

    async fn security_group_by_name(&self, name: &str) -> Result<SecurityGroup> {
        self.run_json(&["security", "group", "show", name]).await
    }

    async fn create_security_group_rule(&self, group: &SecurityGroup, rule: &RuleInfo) -> Result<()> {
        let ports = format!("{}:{}", rule.from_port, rule.to_port);
        let mut args = vec![
            "security",
            "group",
            "rule",
            "create",
            "--ingress",
            "--protocol",
            rule.protocol.as_str(),
        ];
        if rule.protocol != "icmp" {
            args.push("--dst-port");
            args.push(ports.as_str());
        }
        match &rule.cidr {
            Some(cidr) => {
                args.push("--remote-ip");
                args.push(cidr.as_str());
            }
            None => {
                args.push("--remote-group");
                args.push(group.id.as_str());
            }
        }
        args.push(group.id.as_str());
        self.run_command(&args).await?;
        Ok(())
    }

    async fn create_container(&self, container: &str) -> Result<()> {
        self.run_command(&["container", "create", container]).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> Result<()> {
        self.run_command(&["container", "delete", container]).await?;
        Ok(())
    }

    async fn put_object(&self, container: &str, name: &str, data: &[u8]) -> Result<()> {
        let file = scratch_file(data)?;
        let path = path_str(&file)?;
        self.run_command(&["object", "create", container, path.as_str(), "--name", name])
            .await?;
        Ok(())
    }

    async fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        self.run_raw(&["object", "save", container, name, "--file", "-"])
            .await
    }

    async fn list_objects(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ObjectRow {
            #[serde(alias = "Name")]
            name: String,
        }

        let mut args = vec!["object", "list", container];
        if !prefix.is_empty() {
            args.extend(["--prefix", prefix]);
        }
        let rows: Vec<ObjectRow> = self.run_json(&args).await?;
        let mut names: Vec<String> = rows.into_iter().map(|r| r.name).collect();
        names.sort();
        Ok(names)
    }

    async fn delete_object(&self, container: &str, name: &str) -> Result<()> {
        self.run_command(&["object", "delete", container, name]).await?;
        Ok(())
    }

    async fn object_store_url(&self) -> Result<String> {
        let catalog: Value = self.run_json(&["catalog", "show", "object-store"]).await?;
        object_store_endpoint(&catalog, &self.credentials.region).ok_or_else(|| {
            OpenStackError::UnexpectedOutput("no public object-store endpoint in catalog".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure("No server with a name or ID of 'abc' exists.").is_not_found());
        assert!(classify_failure("Not Found (HTTP 404)").is_not_found());
        assert!(classify_failure("No SecurityGroup found for corral-test").is_not_found());
        assert!(classify_failure("Security group rule already exists. Rule id is x.").is_duplicate());
        assert!(matches!(
            classify_failure("Quota exceeded for instances"),
            OpenStackError::CommandFailed(_)
        ));
    }

    #[test]
    fn test_parse_networks_object() {
        let nets = parse_networks(&json!({"private": ["10.0.0.3", "2001:db8::3"], "public": ["1.2.3.4"]}));
        assert_eq!(nets["private"][0], IpAddress::parse("10.0.0.3"));
        assert_eq!(nets["private"][1].version, 6);
        assert_eq!(nets["public"][0].addr, "1.2.3.4");
    }

    #[test]
    fn test_parse_networks_string() {
        let nets = parse_networks(&json!("private=10.0.0.3, 15.185.1.2; public=1.2.3.4"));
        assert_eq!(nets["private"].len(), 2);
        assert_eq!(nets["private"][1].addr, "15.185.1.2");
        assert_eq!(nets["public"][0].addr, "1.2.3.4");
        assert!(parse_networks(&json!("")).is_empty());
    }

    #[test]
    fn test_server_rows() {
        let listed: ServerRow = serde_json::from_value(json!({
            "ID": "abc", "Name": "corral-test-machine-0", "Status": "ACTIVE",
            "Networks": {"public": ["1.2.3.4"]}, "Image": "trusty"
        }))
        .unwrap();
        let server = Server::from(listed);
        assert_eq!(server.id, "abc");
        assert!(server.is_live());

        let shown: ServerRow = serde_json::from_value(json!({
            "id": "abc", "name": "corral-test-machine-0", "status": "BUILD",
            "addresses": "private=10.0.0.3"
        }))
        .unwrap();
        assert_eq!(Server::from(shown).addresses["private"][0].addr, "10.0.0.3");
    }

    #[test]
    fn test_flavor_row_units() {
        let row: FlavorRow = serde_json::from_value(json!({
            "ID": "2", "Name": "m1.small", "RAM": 2048, "Disk": 20, "VCPUs": 1, "Is Public": true
        }))
        .unwrap();
        let it = InstanceType::from(row);
        assert_eq!(it.mem, 2048);
        assert_eq!(it.root_disk, 20 * 1024);
    }

    #[test]
    fn test_floating_ip_rows() {
        let free: FloatingIpRow = serde_json::from_value(json!({
            "ID": "f1", "Floating IP Address": "1.2.3.4", "Port": null
        }))
        .unwrap();
        assert_eq!(FloatingIp::from(free).instance_id, None);

        let created: FloatingIpRow = serde_json::from_value(json!({
            "id": "f2", "floating_ip_address": "1.2.3.5", "port_id": "p1"
        }))
        .unwrap();
        assert_eq!(FloatingIp::from(created).instance_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_object_store_endpoint() {
        let catalog = json!({"endpoints": [
            {"interface": "internal", "region": "r1", "url": "http://internal/v1/AUTH_t"},
            {"interface": "public", "region": "r2", "url": "http://r2/v1/AUTH_t"},
            {"interface": "public", "region": "r1", "url": "http://r1/v1/AUTH_t/"}
        ]});
        assert_eq!(object_store_endpoint(&catalog, "r1").unwrap(), "http://r1/v1/AUTH_t");
        assert_eq!(object_store_endpoint(&catalog, "r9").unwrap(), "http://r2/v1/AUTH_t");

        let legacy = json!({"endpoints": "RegionOne\n  public: http://swift/v1/AUTH_t\n  internal: http://x\n"});
        assert_eq!(object_store_endpoint(&legacy, "RegionOne").unwrap(), "http://swift/v1/AUTH_t");
    }
}
