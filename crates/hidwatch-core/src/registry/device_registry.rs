//! The device registry and its monitoring loop.

use super::device_set::DeviceSet;
use super::status::{DeviceChange, MonitorReport, MonitorStatus};
use crate::backend::{
    Action, EventSource, HotplugBackend, HotplugEvent, Interrupter, Readiness, WaitError,
};
use crate::cancel::CancellationToken;
use crate::config::RegistryConfig;
use crate::device::{CreationState, DeviceId};
use crate::error::{HotplugError, Result};
use crate::retry::retry_while;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, trace, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the running flag on every exit from `init` or `run`, unwinding included.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Live registry of the devices present on the host.
///
/// The registry is seeded once by [`init`](Self::init) and then kept current
/// by [`run`](Self::run), a blocking loop the caller drives on a dedicated
/// thread. Any number of threads can read [`refresh`](Self::refresh) while
/// the loop runs; the loop is the only writer.
///
/// # Example
///
/// ```
/// use hidwatch_core::backend::MemoryBackend;
/// use hidwatch_core::DeviceRegistry;
/// use std::sync::Arc;
///
/// let (backend, controller) = MemoryBackend::new(["/dev/path/1"]);
/// let registry = Arc::new(DeviceRegistry::new(backend));
/// registry.init()?;
///
/// let monitor = {
///     let registry = registry.clone();
///     std::thread::spawn(move || registry.run())
/// };
///
/// let mut changes = registry.subscribe_changes();
/// controller.add("/dev/path/2");
/// let change = changes.blocking_recv().unwrap();
/// assert_eq!(change.device.as_str(), "/dev/path/2");
///
/// registry.stop();
/// monitor.join().unwrap()?;
///
/// assert_eq!(registry.refresh().len(), 2);
/// # Ok::<(), hidwatch_core::HotplugError>(())
/// ```
pub struct DeviceRegistry<B: HotplugBackend> {
    backend: B,
    devices: DeviceSet,
    /// Armed source between `init` and `run`; taken by `run` while it loops.
    source: Mutex<Option<B::Source>>,
    interrupter: Mutex<Option<Interrupter>>,
    running: AtomicBool,
    cancel: CancellationToken,
    status: watch::Sender<MonitorStatus>,
    changes: broadcast::Sender<DeviceChange>,
}

impl<B: HotplugBackend> DeviceRegistry<B> {
    /// Create an empty, uninitialized registry.
    pub fn new(backend: B) -> Self {
        let (status, _) = watch::channel(MonitorStatus::Idle);
        let (changes, _) = broadcast::channel(RegistryConfig::CHANGE_CHANNEL_CAPACITY);
        Self {
            backend,
            devices: DeviceSet::new(),
            source: Mutex::new(None),
            interrupter: Mutex::new(None),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            status,
            changes,
        }
    }

    /// Whether the backend's native capability exists on this host.
    ///
    /// Independent of registry state; safe to call before `init`.
    pub fn is_supported(&self) -> Result<bool> {
        self.backend.is_supported()
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Acquire the event source and seed the set with a bulk enumeration.
    ///
    /// Fails if the capability cannot be acquired; the registry is then left
    /// as it was. Calling `init` again while stopped or faulted re-acquires
    /// the source and reseeds from scratch. Returns `AlreadyRunning` while
    /// `run` or another `init` holds the registry.
    pub fn init(&self) -> Result<()> {
        let _claim = self.claim()?;

        let mut source = self.backend.open()?;
        let seed = source.enumerate()?;
        let interrupter = source.interrupter();

        self.devices.replace_all(seed);
        *lock(&self.source) = Some(source);
        *lock(&self.interrupter) = Some(interrupter);
        self.status.send_replace(MonitorStatus::Ready);

        info!(
            "Device registry initialized with {} device(s) from the {} backend",
            self.devices.len(),
            self.backend.name()
        );
        Ok(())
    }

    /// Apply hotplug events to the set until stopped or the source fails.
    ///
    /// Blocks the calling thread. Returns `Ok` after [`stop`](Self::stop);
    /// the source is kept and the loop can be started again once the
    /// cancellation is reset. Returns `MonitorFailed` when waiting for events
    /// fails for good; the status turns `Faulted` and the device list stays
    /// frozen at its last state.
    pub fn run(&self) -> Result<MonitorReport> {
        let _claim = self.claim()?;

        let Some(mut source) = lock(&self.source).take() else {
            return Err(HotplugError::NotInitialized);
        };

        self.status.send_replace(MonitorStatus::Running);
        info!("Device monitor started");

        match self.monitor(&mut source) {
            Ok(report) => {
                *lock(&self.source) = Some(source);
                self.status.send_replace(MonitorStatus::Stopped);
                info!(
                    "Device monitor stopped ({} added, {} removed)",
                    report.added, report.removed
                );
                Ok(report)
            }
            Err(reason) => {
                drop(source);
                lock(&self.interrupter).take();
                error!("Device monitor failed, device list is now stale: {}", reason);
                self.status.send_replace(MonitorStatus::Faulted {
                    reason: reason.clone(),
                    at: Utc::now(),
                });
                Err(HotplugError::MonitorFailed { reason })
            }
        }
    }

    /// Exclusive right to touch the source and seed the set, held for the
    /// whole of `init` or `run`.
    fn claim(&self) -> Result<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| HotplugError::AlreadyRunning)?;
        Ok(RunningGuard(&self.running))
    }

    fn monitor(&self, source: &mut B::Source) -> std::result::Result<MonitorReport, String> {
        let mut report = MonitorReport::default();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(report);
            }

            let (waited, stats) = retry_while(|| source.wait(), WaitError::is_interrupted);
            report.interrupts += u64::from(stats.interrupts);
            match waited {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::Woken) => continue,
                Err(e) => return Err(e.to_string()),
            }

            match source.receive() {
                Ok(Some(event)) => self.apply(event, &mut report),
                Ok(None) => report.ignored += 1,
                Err(e) if e.is_events_lost() => {
                    warn!("{}, re-reading the device list", e);
                    self.resync(source, &mut report)?;
                }
                Err(e) => {
                    warn!("Failed to read device event: {}", e);
                    report.unreadable += 1;
                }
            }
        }
    }

    fn apply(&self, event: HotplugEvent, report: &mut MonitorReport) {
        match (event.action, event.device) {
            (Action::Add, Some(id)) => {
                if self.devices.insert(id.clone()) {
                    debug!("Device added: {}", id);
                    report.added += 1;
                    self.publish(DeviceChange::added(id));
                } else {
                    trace!("Device already present: {}", id);
                    report.ignored += 1;
                }
            }
            (Action::Remove, Some(id)) => {
                if self.devices.remove(&id) {
                    debug!("Device removed: {}", id);
                    report.removed += 1;
                    self.publish(DeviceChange::removed(id));
                } else {
                    trace!("Device already absent: {}", id);
                    report.ignored += 1;
                }
            }
            (action, device) => {
                trace!("Ignoring {} event for {:?}", action, device);
                report.ignored += 1;
            }
        }
    }

    /// Replace the set with a fresh enumeration after lost notifications.
    /// Failing to enumerate ends the loop.
    fn resync(
        &self,
        source: &mut B::Source,
        report: &mut MonitorReport,
    ) -> std::result::Result<(), String> {
        let present = source
            .enumerate()
            .map_err(|e| format!("re-enumeration after lost events failed: {e}"))?;
        let (added, removed) = self.devices.reconcile(present);
        report.resyncs += 1;
        info!(
            "Device list re-read: {} added, {} removed",
            added.len(),
            removed.len()
        );

        for id in removed {
            report.removed += 1;
            self.publish(DeviceChange::removed(id));
        }
        for id in added {
            report.added += 1;
            self.publish(DeviceChange::added(id));
        }
        Ok(())
    }

    fn publish(&self, change: DeviceChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Ask a running loop to return, waking it if it is blocked.
    ///
    /// A stop requested before `run` makes `run` return immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
        let interrupter = lock(&self.interrupter).clone();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }
    }

    /// Clear a previous stop so `run` can be called again.
    pub fn reset_cancellation(&self) {
        self.cancel.reset();
    }

    /// Whether the monitoring loop is running.
    pub fn is_running(&self) -> bool {
        self.status.borrow().is_running()
    }

    // ========================================
    // Queries
    // ========================================

    /// Point-in-time copy of the present devices, in insertion order.
    pub fn refresh(&self) -> Vec<DeviceId> {
        self.devices.snapshot()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains(id)
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    /// Receive every effective change applied by the loop from now on.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }

    // ========================================
    // Two-phase device creation
    // ========================================

    /// Construct a device for `id` and load its info.
    ///
    /// `None` means the device vanished or cannot be read; it is not an
    /// error. On `Some`, the caller must pass the device and state to
    /// [`complete_device`](Self::complete_device) once it accepts the device.
    pub fn try_create_device(&self, id: &DeviceId) -> Option<(B::Device, CreationState)> {
        self.backend.try_create_device(id)
    }

    /// Finish creating a device accepted after `try_create_device`.
    pub fn complete_device(&self, id: &DeviceId, device: &mut B::Device, state: CreationState) {
        self.backend.complete_device(id, device, state)
    }
}
