//! Live device registry.
//!
//! This module holds the authoritative set of present devices and the loop
//! that keeps it in sync with hotplug events:
//! - **Device set**: insertion-ordered identifiers, one writer, many readers
//! - **Monitor**: the blocking event loop, its status and change feed
//!
//! The registry never spawns threads itself. Callers drive
//! [`DeviceRegistry::run`] on a thread of their choosing, or use
//! [`DeviceManager::start`](crate::DeviceManager::start).

pub mod device_registry;
pub mod device_set;
pub mod status;

pub use device_registry::DeviceRegistry;
pub use device_set::DeviceSet;
pub use status::{ChangeKind, DeviceChange, MonitorReport, MonitorStatus};
