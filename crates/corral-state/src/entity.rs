//! Machines, units and unit agents, as far as their status goes

use crate::collection::{StatusCollection, StatusDoc};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_core::{Status, StatusData, StatusUpdate};
use std::sync::Arc;

/// A status as read back
#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub status: Status,
    pub info: String,
    pub data: Option<StatusData>,
    pub since: DateTime<Utc>,
}

impl From<StatusDoc> for StatusInfo {
    fn from(doc: StatusDoc) -> Self {
        Self {
            status: doc.status,
            info: doc.status_info,
            data: doc.status_data,
            since: doc.updated,
        }
    }
}

#[async_trait]
pub trait StatusSetter: Send + Sync {
    async fn set_status(&self, status: Status, info: &str, data: Option<StatusData>) -> Result<()>;
}

#[async_trait]
pub trait StatusGetter: Send + Sync {
    async fn status(&self) -> Result<StatusInfo>;
}

pub fn machine_global_key(id: &str) -> String {
    format!("m#{}", id)
}

pub fn unit_global_key(name: &str) -> String {
    format!("u#{}", name)
}

pub fn unit_agent_global_key(name: &str) -> String {
    format!("u#{}#charm", name)
}

async fn read_status(statuses: &StatusCollection, key: &str) -> Result<StatusInfo> {
    Ok(statuses.get(key).await?.into())
}

/// A machine in the environment
#[derive(Debug, Clone)]
pub struct Machine {
    id: String,
    statuses: Arc<StatusCollection>,
}

impl Machine {
    /// Record a new machine; it starts out `pending`.
    pub async fn create(statuses: Arc<StatusCollection>, id: impl Into<String>) -> Result<Self> {
        let machine = Self {
            id: id.into(),
            statuses,
        };
        let update = StatusUpdate::new(Status::Pending, "", None);
        update.validate_machine(true)?;
        machine
            .statuses
            .create(&machine.global_key(), machine.statuses.doc(update.status, update.info, update.data))
            .await?;
        Ok(machine)
    }

    /// A handle on a machine that already exists
    pub fn new(statuses: Arc<StatusCollection>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            statuses,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn global_key(&self) -> String {
        machine_global_key(&self.id)
    }

    pub async fn remove(&self) -> Result<()> {
        self.statuses.remove(&self.global_key()).await
    }
}

#[async_trait]
impl StatusSetter for Machine {
    async fn set_status(&self, status: Status, info: &str, data: Option<StatusData>) -> Result<()> {
        let update = StatusUpdate::new(status, info, data);
        update.validate_machine(false)?;
        let doc = self.statuses.doc(update.status, update.info, update.data);
        self.statuses.update(&self.global_key(), doc).await
    }
}

#[async_trait]
impl StatusGetter for Machine {
    async fn status(&self) -> Result<StatusInfo> {
        read_status(&self.statuses, &self.global_key()).await
    }
}

/// A unit of a service. Its status describes the workload; the agent
/// running it has a status of its own, see [`Unit::agent`].
#[derive(Debug, Clone)]
pub struct Unit {
    name: String,
    statuses: Arc<StatusCollection>,
}

impl Unit {
    /// Record a new unit: the workload starts `unknown` and its agent
    /// `allocating`.
    pub async fn create(statuses: Arc<StatusCollection>, name: impl Into<String>) -> Result<Self> {
        let unit = Self {
            name: name.into(),
            statuses,
        };
        let agent_key = unit_agent_global_key(&unit.name);
        let agent_doc = unit.statuses.doc(Status::Allocating, "", None);
        unit.statuses.create(&agent_key, agent_doc).await?;
        let doc = unit.statuses.doc(Status::Unknown, "Waiting for agent initialization to finish", None);
        if let Err(e) = unit.statuses.create(&unit.global_key(), doc).await {
            if let Err(cleanup) = unit.statuses.remove(&agent_key).await {
                tracing::warn!("Cannot remove status {}: {}", agent_key, cleanup);
            }
            return Err(e);
        }
        Ok(unit)
    }

    pub fn new(statuses: Arc<StatusCollection>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statuses,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_key(&self) -> String {
        unit_global_key(&self.name)
    }

    pub fn agent(&self) -> UnitAgent {
        UnitAgent {
            unit_name: self.name.clone(),
            statuses: self.statuses.clone(),
        }
    }

    /// Delete the unit's and its agent's statuses.
    pub async fn remove(&self) -> Result<()> {
        self.statuses.remove(&self.global_key()).await?;
        self.statuses.remove(&unit_agent_global_key(&self.name)).await
    }
}

#[async_trait]
impl StatusSetter for Unit {
    async fn set_status(&self, status: Status, info: &str, data: Option<StatusData>) -> Result<()> {
        let update = StatusUpdate::new(status, info, data);
        update.validate_unit()?;
        let doc = self.statuses.doc(update.status, update.info, update.data);
        self.statuses.update(&self.global_key(), doc).await
    }
}

#[async_trait]
impl StatusGetter for Unit {
    async fn status(&self) -> Result<StatusInfo> {
        read_status(&self.statuses, &self.global_key()).await
    }
}

/// The agent running a unit
#[derive(Debug, Clone)]
pub struct UnitAgent {
    unit_name: String,
    statuses: Arc<StatusCollection>,
}

impl UnitAgent {
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn global_key(&self) -> String {
        unit_agent_global_key(&self.unit_name)
    }
}

#[async_trait]
impl StatusSetter for UnitAgent {
    async fn set_status(&self, status: Status, info: &str, data: Option<StatusData>) -> Result<()> {
        let update = StatusUpdate::new(status, info, data);
        update.validate_unit_agent()?;
        let doc = self.statuses.doc(update.status, update.info, update.data);
        self.statuses.update(&self.global_key(), doc).await
    }
}

#[async_trait]
impl StatusGetter for UnitAgent {
    async fn status(&self) -> Result<StatusInfo> {
        read_status(&self.statuses, &self.global_key()).await
    }
}
