//! Monitor status, change notifications and run reports.

use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a registry's monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Constructed, never initialized.
    Idle,
    /// Initialized and seeded; the loop is not running.
    Ready,
    Running,
    /// The loop was stopped on request; it can be restarted.
    Stopped,
    /// The loop died. The device list is frozen at its last state.
    Faulted { reason: String, at: DateTime<Utc> },
}

impl MonitorStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, MonitorStatus::Running)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, MonitorStatus::Faulted { .. })
    }

    /// True when the device list no longer follows hotplug events.
    pub fn is_stale(&self) -> bool {
        matches!(self, MonitorStatus::Stopped | MonitorStatus::Faulted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
}

/// One effective change of the device set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChange {
    pub kind: ChangeKind,
    pub device: DeviceId,
}

impl DeviceChange {
    pub fn added(device: DeviceId) -> Self {
        Self {
            kind: ChangeKind::Added,
            device,
        }
    }

    pub fn removed(device: DeviceId) -> Self {
        Self {
            kind: ChangeKind::Removed,
            device,
        }
    }
}

/// Counters for one run of the monitoring loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Devices inserted into the set.
    pub added: u64,
    /// Devices removed from the set.
    pub removed: u64,
    /// Notifications that left the set unchanged.
    pub ignored: u64,
    /// Notifications whose fields could not be read.
    pub unreadable: u64,
    /// Interrupted waits that were retried.
    pub interrupts: u64,
    /// Times the set was re-read after notifications were lost.
    pub resyncs: u64,
}
