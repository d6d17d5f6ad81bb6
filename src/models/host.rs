//! Host model

use crate::config::MachineConfig;
use crate::driver::{DriverKind, SshCredentials};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Power state reported by a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Driver has no VM by that name, or reported nothing recognizable
    None,
    Running,
    Paused,
    Saved,
    Stopped,
    Starting,
    Stopping,
    Error,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::None => write!(f, ""),
            PowerState::Running => write!(f, "Running"),
            PowerState::Paused => write!(f, "Paused"),
            PowerState::Saved => write!(f, "Saved"),
            PowerState::Stopped => write!(f, "Stopped"),
            PowerState::Starting => write!(f, "Starting"),
            PowerState::Stopping => write!(f, "Stopping"),
            PowerState::Error => write!(f, "Error"),
        }
    }
}

impl PowerState {
    pub fn is_running(&self) -> bool {
        *self == PowerState::Running
    }

    /// Hyper-V `Get-VM` state codes
    pub fn from_hyperv_state(state: i32) -> Self {
        match state {
            2 => PowerState::Running,
            3 => PowerState::Stopped,
            4 => PowerState::Stopping,
            6 => PowerState::Saved,
            9 => PowerState::Paused,
            10 => PowerState::Starting,
            _ => PowerState::Error,
        }
    }
}

/// Persisted descriptor of the single managed VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub driver: DriverKind,
    pub machine: MachineConfig,
    /// Local path of the cached boot image this host was created from
    pub iso_path: String,
    pub state: PowerState,
    pub ip_address: Option<String>,
    pub ssh: SshCredentials,
    pub created_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        driver: DriverKind,
        machine: MachineConfig,
        iso_path: impl Into<String>,
        ssh: SshCredentials,
    ) -> Self {
        Self {
            name: name.into(),
            driver,
            machine,
            iso_path: iso_path.into(),
            state: PowerState::Stopped,
            ip_address: None,
            ssh,
            created_at: Utc::now(),
            last_started_at: None,
        }
    }
}
