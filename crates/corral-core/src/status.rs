//! Status values for machines, unit agents and unit workloads
//!
//! The same [`Status`] enumeration is shared by three domains. Each domain
//! has a read-side validity check (which still accepts deprecated values so
//! old records can be displayed) and a stricter set-side check that
//! decides what a writer may persist.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form structured data attached to an `error` status
pub type StatusData = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    // Common to machine and unit agents.
    /// Requires human intervention
    Error,
    /// Participating in the environment; kept for backwards compatibility
    Started,

    // Machine agents.
    Pending,
    Stopped,
    /// Should be signalling activity but is not; observed, never set
    Down,

    // Unit agents.
    Allocating,
    Rebooting,
    Executing,
    Idle,
    Failed,
    Lost,
    /// Deprecated
    Installing,
    /// Deprecated
    Stopping,

    // Service and unit workloads.
    Maintenance,
    Terminated,
    Unknown,
    Waiting,
    Blocked,
    Active,
}

const ALL: &[Status] = &[
    Status::Error,
    Status::Started,
    Status::Pending,
    Status::Stopped,
    Status::Down,
    Status::Allocating,
    Status::Rebooting,
    Status::Executing,
    Status::Idle,
    Status::Failed,
    Status::Lost,
    Status::Installing,
    Status::Stopping,
    Status::Maintenance,
    Status::Terminated,
    Status::Unknown,
    Status::Waiting,
    Status::Blocked,
    Status::Active,
];

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Error => "error",
            Status::Started => "started",
            Status::Pending => "pending",
            Status::Stopped => "stopped",
            Status::Down => "down",
            Status::Allocating => "allocating",
            Status::Rebooting => "rebooting",
            Status::Executing => "executing",
            Status::Idle => "idle",
            Status::Failed => "failed",
            Status::Lost => "lost",
            Status::Installing => "installing",
            Status::Stopping => "stopping",
            Status::Maintenance => "maintenance",
            Status::Terminated => "terminated",
            Status::Unknown => "unknown",
            Status::Waiting => "waiting",
            Status::Blocked => "blocked",
            Status::Active => "active",
        }
    }

    /// Whether the value is known for an agent (machine or unit).
    pub fn valid_agent_status(&self) -> bool {
        use Status::*;
        matches!(
            self,
            Allocating | Error | Failed | Rebooting | Executing | Idle
                // deprecated
                | Pending | Started | Stopped | Installing | Active | Stopping | Down
        )
    }

    /// Whether the value is known for a workload.
    pub fn valid_workload_status(&self) -> bool {
        use Status::*;
        matches!(
            self,
            Blocked | Maintenance | Waiting | Active | Unknown | Terminated
                // deprecated
                | Pending | Installing | Started | Stopped | Down
        )
    }

    /// Whether `candidate` denotes this workload status, allowing the
    /// candidate to be a deprecated value.
    ///
    /// Only the candidate is translated: a stored deprecated value does not
    /// match its modern replacement.
    pub fn workload_matches(&self, candidate: Status) -> bool {
        if candidate == *self {
            return true;
        }
        let candidate = match candidate {
            Status::Down | Status::Stopped => Status::Terminated,
            Status::Installing => Status::Maintenance,
            Status::Started => Status::Active,
            other => other,
        };
        *self == candidate
    }

    /// Whether `candidate` denotes this agent status, allowing the
    /// candidate to be a deprecated value. Directional like
    /// [`Status::workload_matches`].
    pub fn matches(&self, candidate: Status) -> bool {
        let candidate = match candidate {
            Status::Down => Status::Lost,
            Status::Started => Status::Active,
            Status::Stopped => Status::Stopping,
            other => other,
        };
        *self == candidate
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        ALL.iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// The three status domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Machine,
    UnitAgent,
    UnitWorkload,
}

impl Domain {
    /// Whether `status` is a known value for this domain.
    pub fn is_valid(&self, status: Status) -> bool {
        use Status::*;
        match self {
            Domain::Machine => matches!(status, Pending | Started | Stopped | Error | Down),
            Domain::UnitAgent => matches!(
                status,
                Allocating | Rebooting | Executing | Idle | Failed | Lost | Error
                    // deprecated
                    | Pending | Started | Stopped
            ),
            Domain::UnitWorkload => matches!(
                status,
                Blocked | Maintenance | Waiting | Active | Unknown | Terminated
            ),
        }
    }
}

/// A requested status change, validated before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: Status,
    pub info: String,
    pub data: Option<StatusData>,
}

impl StatusUpdate {
    pub fn new(status: Status, info: impl Into<String>, data: Option<StatusData>) -> Self {
        Self {
            status,
            info: info.into(),
            data,
        }
    }

    /// Validate a machine status change. `pending` is only accepted when
    /// `allow_pending` is set, which is the case while the machine is being
    /// created.
    pub fn validate_machine(&self, allow_pending: bool) -> Result<()> {
        if !Domain::Machine.is_valid(self.status) {
            return Err(CoreError::InvalidStatus(self.status.to_string()));
        }
        match self.status {
            Status::Pending if !allow_pending => {
                return Err(CoreError::StatusNotSettable(self.status.to_string()));
            }
            Status::Down => return Err(CoreError::StatusNotSettable(self.status.to_string())),
            Status::Error if self.info.is_empty() => {
                return Err(CoreError::StatusInfoRequired(self.status.to_string()));
            }
            _ => {}
        }
        self.check_data()
    }

    /// Validate a unit agent status change.
    pub fn validate_unit_agent(&self) -> Result<()> {
        if !Domain::UnitAgent.is_valid(self.status) {
            return Err(CoreError::InvalidStatus(self.status.to_string()));
        }
        match self.status {
            Status::Pending | Status::Down | Status::Started | Status::Stopped => {
                return Err(CoreError::DeprecatedStatus(self.status.to_string()));
            }
            Status::Allocating | Status::Lost => {
                return Err(CoreError::StatusNotSettable(self.status.to_string()));
            }
            Status::Error if self.info.is_empty() => {
                return Err(CoreError::StatusInfoRequired(self.status.to_string()));
            }
            _ => {}
        }
        self.check_data()
    }

    /// Validate a unit workload status change.
    pub fn validate_unit(&self) -> Result<()> {
        if !Domain::UnitWorkload.is_valid(self.status) {
            return Err(CoreError::InvalidStatus(self.status.to_string()));
        }
        Ok(())
    }

    fn check_data(&self) -> Result<()> {
        if self.data.is_some() && self.status != Status::Error {
            return Err(CoreError::StatusDataNotAllowed(self.status.to_string()));
        }
        Ok(())
    }
}
