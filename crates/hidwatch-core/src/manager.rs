//! Manager façade: list and open devices.
//!
//! The manager owns a [`DeviceRegistry`], runs its monitor on a dedicated
//! thread when asked, and keeps validated device handles cached by
//! identifier so each attachment is created once.

use crate::backend::HotplugBackend;
use crate::config::RegistryConfig;
use crate::device::DeviceId;
use crate::error::{HotplugError, Result};
use crate::registry::{DeviceRegistry, MonitorReport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::debug;

/// Entry point for listing and opening devices.
pub struct DeviceManager<B: HotplugBackend> {
    registry: Arc<DeviceRegistry<B>>,
    cache: Mutex<HashMap<DeviceId, Arc<B::Device>>>,
}

impl<B: HotplugBackend> DeviceManager<B> {
    /// Create a manager and initialize its registry.
    ///
    /// Fails if the backend's capability cannot be acquired. Use
    /// [`HotplugBackend::is_supported`] first to avoid that path.
    pub fn new(backend: B) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new(backend));
        registry.init()?;
        Ok(Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry<B>> {
        &self.registry
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<DeviceId, Arc<B::Device>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifiers of the present devices.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.registry.refresh()
    }

    /// Validated handles for the present devices, in registry order.
    ///
    /// Devices that cannot be read right now are left out and retried on
    /// the next call.
    pub fn devices(&self) -> Vec<Arc<B::Device>> {
        let snapshot = self.registry.refresh();
        let present: HashSet<&DeviceId> = snapshot.iter().collect();

        let mut cache = self.cache();
        cache.retain(|id, _| present.contains(id));

        let mut devices = Vec::with_capacity(snapshot.len());
        for id in &snapshot {
            if let Some(device) = cache.get(id) {
                devices.push(device.clone());
            } else if let Some(device) = self.create(id) {
                cache.insert(id.clone(), device.clone());
                devices.push(device);
            }
        }
        devices
    }

    /// Validated handle for one present device.
    pub fn open(&self, id: &DeviceId) -> Option<Arc<B::Device>> {
        if !self.registry.contains(id) {
            return None;
        }
        let mut cache = self.cache();
        if let Some(device) = cache.get(id) {
            return Some(device.clone());
        }
        let device = self.create(id)?;
        cache.insert(id.clone(), device.clone());
        Some(device)
    }

    fn create(&self, id: &DeviceId) -> Option<Arc<B::Device>> {
        let (mut device, state) = self.registry.try_create_device(id)?;
        self.registry.complete_device(id, &mut device, state);
        debug!("Created device {}", id);
        Some(Arc::new(device))
    }
}

impl<B> DeviceManager<B>
where
    B: HotplugBackend + 'static,
{
    /// Run the registry's monitor on a dedicated thread.
    ///
    /// Dropping the handle detaches the thread; call
    /// [`MonitorHandle::stop`] and [`MonitorHandle::join`] to shut down.
    pub fn start(&self) -> Result<MonitorHandle<B>> {
        let registry = self.registry.clone();
        let thread = std::thread::Builder::new()
            .name(RegistryConfig::MONITOR_THREAD_NAME.to_string())
            .spawn(move || registry.run())
            .map_err(|e| HotplugError::Io {
                message: format!("Failed to spawn device monitor thread: {}", e),
                path: None,
                source: Some(e),
            })?;

        Ok(MonitorHandle {
            registry: self.registry.clone(),
            thread,
        })
    }
}

#[cfg(target_os = "linux")]
impl DeviceManager<crate::backend::LinuxBackend> {
    /// Whether the default Linux backend works on this host.
    pub fn is_supported_default() -> Result<bool> {
        crate::backend::LinuxBackend::default().is_supported()
    }
}

/// Handle to a monitor thread started by [`DeviceManager::start`].
pub struct MonitorHandle<B: HotplugBackend> {
    registry: Arc<DeviceRegistry<B>>,
    thread: JoinHandle<Result<MonitorReport>>,
}

impl<B: HotplugBackend> MonitorHandle<B> {
    /// Request the monitor to stop. Returns without waiting.
    pub fn stop(&self) {
        self.registry.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the monitor thread and return the loop's result.
    pub fn join(self) -> Result<MonitorReport> {
        self.thread.join().map_err(|_| HotplugError::MonitorFailed {
            reason: "device monitor thread panicked".to_string(),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::device::DeviceHandle;

    #[test]
    fn test_new_fails_without_capability() {
        let (backend, _controller) = MemoryBackend::unavailable();
        let result = DeviceManager::new(backend);
        assert!(result.err().unwrap().is_capability_absent());
    }

    #[test]
    fn test_devices_are_created_once() {
        let (backend, controller) = MemoryBackend::new(["A", "B"]);
        let manager = DeviceManager::new(backend).unwrap();

        let first = manager.devices();
        let second = manager.devices();

        assert_eq!(first.len(), 2);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(controller.completed().len(), 2);
    }

    #[test]
    fn test_unreadable_device_is_skipped_then_retried() {
        let (backend, controller) = MemoryBackend::new(["A", "B"]);
        controller.set_readable("B", false);
        let manager = DeviceManager::new(backend).unwrap();

        let devices = manager.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id().as_str(), "A");

        controller.set_readable("B", true);
        assert_eq!(manager.devices().len(), 2);
    }

    #[test]
    fn test_open() {
        let (backend, _controller) = MemoryBackend::new(["A"]);
        let manager = DeviceManager::new(backend).unwrap();

        let device = manager.open(&"A".into()).unwrap();
        assert!(device.info_loaded());
        assert!(device.ticket().is_some());
        assert!(manager.open(&"Z".into()).is_none());
    }

    #[test]
    fn test_start_stop_join() {
        let (backend, controller) = MemoryBackend::new(["A"]);
        let manager = DeviceManager::new(backend).unwrap();
        let mut changes = manager.registry().subscribe_changes();

        let monitor = manager.start().unwrap();
        controller.remove("A");
        let change = changes.blocking_recv().unwrap();
        assert_eq!(change.device.as_str(), "A");

        monitor.stop();
        let report = monitor.join().unwrap();
        assert_eq!(report.removed, 1);
        assert!(manager.device_ids().is_empty());
        assert!(manager.devices().is_empty());
    }
}
