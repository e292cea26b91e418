//! Security groups
//!
//! Every machine joins the environment group, which tags it as belonging
//! to the environment and opens SSH, the API and the state port to the
//! world plus all traffic between members. Each machine also joins either
//! its own group or the environment's global group, depending on the
//! firewall mode.

use crate::api::{OpenStackApi, RuleInfo, SecurityGroup};
use crate::error::Result;
use corral_cloud::{API_PORT, STATE_PORT};
use corral_config::FirewallMode;

const GROUP_DESCRIPTION: &str = "corral group";

pub fn environ_group_name(env_name: &str) -> String {
    format!("corral-{}", env_name)
}

pub fn global_group_name(env_name: &str) -> String {
    format!("{}-global", environ_group_name(env_name))
}

pub fn machine_group_name(env_name: &str, machine_id: &str) -> String {
    format!("{}-{}", environ_group_name(env_name), machine_id)
}

fn environ_rules() -> Vec<RuleInfo> {
    let state_port = i32::from(STATE_PORT);
    let api_port = i32::from(API_PORT);
    vec![
        RuleInfo::new("tcp", 22, 22, Some("0.0.0.0/0")),
        RuleInfo::new("tcp", api_port, api_port, Some("0.0.0.0/0")),
        RuleInfo::new("tcp", state_port, state_port, Some("0.0.0.0/0")),
        RuleInfo::new("tcp", 1, 65535, None),
        RuleInfo::new("udp", 1, 65535, None),
        RuleInfo::new("icmp", -1, -1, None),
    ]
}

/// Create the groups a new machine joins, returning them in the order
/// they should be attached.
pub async fn set_up_groups(
    api: &dyn OpenStackApi,
    env_name: &str,
    machine_id: &str,
    mode: FirewallMode,
) -> Result<Vec<SecurityGroup>> {
    let environ_group = ensure_group(api, &environ_group_name(env_name), &environ_rules()).await?;
    let machine_group = match mode {
        FirewallMode::Instance => {
            ensure_group(api, &machine_group_name(env_name, machine_id), &[]).await?
        }
        FirewallMode::Global => ensure_group(api, &global_group_name(env_name), &[]).await?,
    };
    Ok(vec![environ_group, machine_group])
}

/// Return the group called `name`, creating it if needed, with `rules`
/// added. Rules that already exist are left alone.
pub async fn ensure_group(
    api: &dyn OpenStackApi,
    name: &str,
    rules: &[RuleInfo],
) -> Result<SecurityGroup> {
    let group = match api.create_security_group(name, GROUP_DESCRIPTION).await {
        Ok(group) => {
            tracing::debug!("Created security group {}", name);
            group
        }
        Err(e) if e.is_duplicate() => api.security_group_by_name(name).await?,
        Err(e) => return Err(e),
    };

    for rule in rules {
        match api.create_security_group_rule(&group, rule).await {
            Err(e) if !e.is_duplicate() => return Err(e),
            _ => {}
        }
    }
    Ok(group)
}
