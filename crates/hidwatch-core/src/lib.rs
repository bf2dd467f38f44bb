//! hidwatch core - live registry of hot-pluggable HID devices.
//!
//! The crate discovers the devices already attached to the host, follows
//! attach/detach events for as long as it runs, and serves consistent
//! snapshots of the present device identifiers. Identifiers are promoted to
//! validated device handles through a two-phase create/complete protocol.
//!
//! # Example
//!
//! ```rust,ignore
//! use hidwatch_core::backend::LinuxBackend;
//! use hidwatch_core::{DeviceManager, HotplugBackend};
//!
//! fn main() -> hidwatch_core::Result<()> {
//!     let backend = LinuxBackend::default();
//!     if !backend.is_supported()? {
//!         return Ok(());
//!     }
//!
//!     let manager = DeviceManager::new(backend)?;
//!     let monitor = manager.start()?;
//!
//!     for device in manager.devices() {
//!         println!("{:?}", device.info());
//!     }
//!
//!     monitor.stop();
//!     monitor.join()?;
//!     Ok(())
//! }
//! ```

pub mod backend;
mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod registry;
pub mod retry;

// Re-export commonly used types
pub use backend::{Action, EventSource, HotplugBackend, HotplugEvent, Interrupter};
pub use device::{CreationState, DeviceHandle, DeviceId};
pub use error::{HotplugError, Result};
pub use manager::{DeviceManager, MonitorHandle};
pub use registry::{
    ChangeKind, DeviceChange, DeviceRegistry, MonitorReport, MonitorStatus,
};
