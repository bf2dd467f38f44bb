//! Native hotplug backends.
//!
//! A backend owns the platform capability the registry is built on. It can
//! enumerate the devices present right now, stream add/remove notifications,
//! and turn an identifier into a [`DeviceHandle`].
//!
//! # Backends
//!
//! - `linux` - kernel uevents over netlink plus a sysfs scan
//! - `memory` - in-process events fed through a controller

#[cfg(target_os = "linux")]
pub mod linux;
pub mod memory;

#[cfg(target_os = "linux")]
pub use linux::{BusType, HidDeviceInfo, HidrawDevice, LinuxBackend, LinuxBackendConfig};
pub use memory::{MemoryBackend, MemoryController};

use crate::device::{CreationState, DeviceHandle, DeviceId};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What happened to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
    /// Any other tag (`change`, `bind`, ...), kept verbatim.
    Other(String),
}

impl Action {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "add" => Action::Add,
            "remove" => Action::Remove,
            other => Action::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
            Action::Other(tag) => tag,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hotplug notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: Action,
    /// `None` when the notification carried no identifier.
    pub device: Option<DeviceId>,
}

impl HotplugEvent {
    pub fn new(action: Action, device: Option<DeviceId>) -> Self {
        Self { action, device }
    }

    pub fn add(device: impl Into<DeviceId>) -> Self {
        Self::new(Action::Add, Some(device.into()))
    }

    pub fn remove(device: impl Into<DeviceId>) -> Self {
        Self::new(Action::Remove, Some(device.into()))
    }
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A notification is ready to be received.
    Ready,
    /// The wait was cut short by an [`Interrupter`].
    Woken,
}

/// Failure of a blocking wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The wait was interrupted by a signal and can be reissued.
    #[error("wait interrupted")]
    Interrupted,
    /// The event stream is unusable.
    #[error("{0}")]
    Fatal(String),
}

impl WaitError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, WaitError::Interrupted)
    }
}

/// Thread-safe handle that wakes a source blocked in [`EventSource::wait`].
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(wake: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(wake))
    }

    /// Wake the blocked wait, if any. A wake with no waiter is remembered
    /// until the next wait.
    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// An armed stream of hotplug notifications for one subsystem.
///
/// Dropping the source releases the native capability.
pub trait EventSource: Send {
    /// Enumerate the identifiers of every matching device present now.
    fn enumerate(&mut self) -> Result<Vec<DeviceId>>;

    /// Block with no timeout until a notification is ready or the source is woken.
    fn wait(&mut self) -> std::result::Result<Readiness, WaitError>;

    /// Receive exactly one pending notification.
    ///
    /// `Ok(None)` means the notification was consumed but is not relevant
    /// (another subsystem, a malformed datagram, a spoofed sender).
    /// `Err(HotplugError::EventsLost)` means notifications were dropped
    /// before they could be received; the caller re-enumerates.
    fn receive(&mut self) -> Result<Option<HotplugEvent>>;

    /// Handle for waking a blocked [`wait`](EventSource::wait) from another thread.
    fn interrupter(&self) -> Interrupter;
}

/// A platform capability for discovering and monitoring devices.
pub trait HotplugBackend: Send + Sync {
    type Source: EventSource;
    type Device: DeviceHandle;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Acquire the native capability and release it immediately.
    ///
    /// `Err(HotplugError::Unsupported)` means the capability is absent.
    fn probe(&self) -> Result<()>;

    /// Acquire the capability and arm it for this backend's subsystem.
    fn open(&self) -> Result<Self::Source>;

    /// Construct a handle for `id`. Nothing is validated yet.
    fn open_device(&self, id: &DeviceId) -> Self::Device;

    /// First creation phase: construct the handle and load its info.
    ///
    /// `None` means the device vanished or is unreadable. That is a routine
    /// outcome when a removal races with enumeration.
    fn try_create_device(&self, id: &DeviceId) -> Option<(Self::Device, CreationState)> {
        let mut device = self.open_device(id);
        if !device.load_info() {
            debug!("Device {} is not readable, skipping", id);
            return None;
        }
        Some((device, CreationState::empty()))
    }

    /// Second creation phase, called after the caller accepted the device.
    fn complete_device(&self, _id: &DeviceId, _device: &mut Self::Device, _state: CreationState) {}

    /// Whether the native capability is present on this host.
    ///
    /// Absence answers `Ok(false)`; any other probe failure is returned.
    fn is_supported(&self) -> Result<bool> {
        match self.probe() {
            Ok(()) => Ok(true),
            Err(e) if e.is_capability_absent() => {
                debug!("{} backend unavailable: {}", self.name(), e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("add"), Action::Add);
        assert_eq!(Action::parse("remove"), Action::Remove);
        assert_eq!(Action::parse("change"), Action::Other("change".into()));
        assert_eq!(Action::parse("bind").as_str(), "bind");
    }

    #[test]
    fn test_interrupter_clones_share_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let interrupter = Interrupter::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = interrupter.clone();

        interrupter.interrupt();
        clone.interrupt();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_error_classification() {
        assert!(WaitError::Interrupted.is_interrupted());
        assert!(!WaitError::Fatal("closed".into()).is_interrupted());
    }
}
