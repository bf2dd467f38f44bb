//! Linux backend: kernel uevents over netlink, enumeration through sysfs.
//!
//! Devices are identified by the sysfs path of their hidraw node, e.g.
//! `/sys/devices/pci0000:00/.../0003:046D:C52B.0004/hidraw/hidraw3`.

mod hidraw;
mod source;
mod sysfs;
mod uevent;

pub use hidraw::{parse_hid_id, BusType, HidDeviceInfo, HidrawDevice};
pub use source::LinuxSource;
pub use sysfs::SysfsLayout;
pub use uevent::Uevent;

use crate::backend::HotplugBackend;
use crate::config::RegistryConfig;
use crate::device::DeviceId;
use crate::error::Result;
use std::path::PathBuf;
use tracing::info;

/// Configuration of the Linux backend.
#[derive(Debug, Clone)]
pub struct LinuxBackendConfig {
    /// Where sysfs is mounted.
    pub sysfs_root: PathBuf,
    /// Kernel subsystem to watch.
    pub subsystem: String,
    /// Directory holding device nodes.
    pub devnode_dir: PathBuf,
    /// Size of the buffer one uevent datagram is read into.
    pub recv_buffer_size: usize,
}

impl Default for LinuxBackendConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(RegistryConfig::DEFAULT_SYSFS_ROOT),
            subsystem: RegistryConfig::DEFAULT_SUBSYSTEM.to_string(),
            devnode_dir: PathBuf::from(RegistryConfig::DEVNODE_DIR),
            recv_buffer_size: RegistryConfig::RECV_BUFFER_SIZE,
        }
    }
}

impl LinuxBackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    pub fn with_devnode_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.devnode_dir = dir.into();
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }
}

/// Hotplug backend for Linux hidraw devices.
#[derive(Debug, Clone, Default)]
pub struct LinuxBackend {
    config: LinuxBackendConfig,
}

impl LinuxBackend {
    pub fn new(config: LinuxBackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinuxBackendConfig {
        &self.config
    }

    fn layout(&self) -> SysfsLayout {
        SysfsLayout::new(&self.config.sysfs_root)
    }
}

impl HotplugBackend for LinuxBackend {
    type Source = LinuxSource;
    type Device = HidrawDevice;

    fn name(&self) -> &'static str {
        "linux"
    }

    fn probe(&self) -> Result<()> {
        self.layout().ensure_mounted()?;
        let socket = source::open_uevent_socket()?;
        drop(socket);
        Ok(())
    }

    fn open(&self) -> Result<LinuxSource> {
        let layout = self.layout();
        layout.ensure_mounted()?;
        let source = LinuxSource::new(
            layout,
            self.config.subsystem.clone(),
            self.config.recv_buffer_size,
        )?;
        info!(
            "Listening for {} uevents (sysfs at {})",
            self.config.subsystem,
            self.config.sysfs_root.display()
        );
        Ok(source)
    }

    fn open_device(&self, id: &DeviceId) -> HidrawDevice {
        HidrawDevice::new(id.clone(), &self.config.devnode_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::sysfs::fixture::*;
    use super::*;
    use crate::device::DeviceHandle;
    use tempfile::TempDir;

    #[test]
    fn test_config_builder() {
        let config = LinuxBackendConfig::new()
            .with_sysfs_root("/tmp/sys")
            .with_subsystem("input")
            .with_devnode_dir("/tmp/dev")
            .with_recv_buffer_size(4096);
        assert_eq!(config.sysfs_root, PathBuf::from("/tmp/sys"));
        assert_eq!(config.subsystem, "input");
        assert_eq!(config.devnode_dir, PathBuf::from("/tmp/dev"));
        assert_eq!(config.recv_buffer_size, 4096);
    }

    #[test]
    fn test_unmounted_sysfs_is_not_supported() {
        let temp = TempDir::new().unwrap();
        let backend =
            LinuxBackend::new(LinuxBackendConfig::new().with_sysfs_root(temp.path().join("none")));
        assert!(!backend.is_supported().unwrap());
        assert!(matches!(backend.open(), Err(e) if e.is_capability_absent()));
    }

    #[test]
    fn test_two_phase_creation_on_fake_sysfs() {
        let temp = TempDir::new().unwrap();
        let syspath = add_hidraw(
            temp.path(),
            USB_DEVICE_DIR,
            "hidraw3",
            "HID_ID=0003:0000046D:0000C52B\nHID_NAME=Receiver\n",
        );
        let backend = LinuxBackend::new(
            LinuxBackendConfig::new()
                .with_sysfs_root(temp.path())
                .with_devnode_dir("/dev"),
        );
        let id = DeviceId::new(syspath.to_string_lossy());

        let (mut device, state) = backend.try_create_device(&id).unwrap();
        assert!(state.is_empty());
        assert_eq!(device.id(), &id);
        assert_eq!(device.info().unwrap().devnode, PathBuf::from("/dev/hidraw3"));
        backend.complete_device(&id, &mut device, state);

        let missing = DeviceId::new(temp.path().join("devices/none/hidraw/hidraw7").to_string_lossy());
        assert!(backend.try_create_device(&missing).is_none());
    }
}
