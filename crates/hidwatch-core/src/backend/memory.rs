//! In-process backend driven by a controller.
//!
//! Nothing native is touched: the "capability" is a counter, enumeration
//! returns a list the controller maintains, and events are queued by the
//! controller. Useful for tests and for embedders that already have their
//! own device discovery and only want the registry semantics.
//!
//! # Example
//!
//! ```
//! use hidwatch_core::backend::{HotplugBackend, MemoryBackend};
//!
//! let (backend, controller) = MemoryBackend::new(["/dev/path/1"]);
//! assert!(backend.is_supported().unwrap());
//! controller.add("/dev/path/2");
//! ```

use super::{EventSource, HotplugBackend, HotplugEvent, Interrupter, Readiness, WaitError};
use crate::device::{CreationState, DeviceHandle, DeviceId};
use crate::error::{HotplugError, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Queued input for the source.
#[derive(Debug)]
enum Message {
    Event(HotplugEvent),
    /// A notification whose fields cannot be read.
    Unreadable,
    /// Notifications were dropped before they could be received.
    Overrun,
    Interrupt,
    Fail(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Available,
    Absent,
    Broken,
}

/// Lets a test park `open` until it is released.
#[derive(Default)]
struct OpenGate {
    closed: bool,
    parked: usize,
}

#[derive(Default)]
struct Queue {
    messages: VecDeque<Message>,
    woken: bool,
    closed: bool,
}

struct Shared {
    availability: Availability,
    fault: String,
    present: Mutex<Vec<DeviceId>>,
    unreadable: Mutex<HashSet<DeviceId>>,
    completed: Mutex<Vec<DeviceId>>,
    queue: Mutex<Queue>,
    ready: Condvar,
    gate: Mutex<OpenGate>,
    gate_changed: Condvar,
    held: AtomicUsize,
    probes: AtomicUsize,
    tickets: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(availability: Availability, fault: String, present: Vec<DeviceId>) -> Arc<Self> {
        Arc::new(Self {
            availability,
            fault,
            present: Mutex::new(present),
            unreadable: Mutex::new(HashSet::new()),
            completed: Mutex::new(Vec::new()),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            gate: Mutex::new(OpenGate::default()),
            gate_changed: Condvar::new(),
            held: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            tickets: AtomicU64::new(0),
        })
    }

    fn acquire(self: &Arc<Self>) -> Result<Capability> {
        match self.availability {
            Availability::Available => {
                self.held.fetch_add(1, Ordering::SeqCst);
                Ok(Capability {
                    shared: self.clone(),
                })
            }
            Availability::Absent => Err(HotplugError::unsupported(
                "in-memory capability marked unavailable",
            )),
            Availability::Broken => Err(HotplugError::Other(self.fault.clone())),
        }
    }

    fn pass_gate(&self) {
        let mut gate = lock(&self.gate);
        if !gate.closed {
            return;
        }
        gate.parked += 1;
        self.gate_changed.notify_all();
        while gate.closed {
            gate = self
                .gate_changed
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        gate.parked -= 1;
    }

    fn push(&self, message: Message) {
        let mut queue = lock(&self.queue);
        queue.messages.push_back(message);
        self.ready.notify_all();
    }
}

/// One acquired capability; released on drop.
struct Capability {
    shared: Arc<Shared>,
}

impl Drop for Capability {
    fn drop(&mut self) {
        self.shared.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Backend whose devices and events live in memory.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

/// Feeds devices and events to a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryController {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create a backend whose enumeration returns `initial`.
    pub fn new<I, T>(initial: I) -> (Self, MemoryController)
    where
        I: IntoIterator<Item = T>,
        T: Into<DeviceId>,
    {
        let present = initial.into_iter().map(Into::into).collect();
        Self::with_availability(Availability::Available, String::new(), present)
    }

    /// A backend whose capability cannot be acquired at all.
    pub fn unavailable() -> (Self, MemoryController) {
        Self::with_availability(Availability::Absent, String::new(), Vec::new())
    }

    /// A backend whose capability acquisition fails with a genuine fault.
    pub fn broken(fault: impl Into<String>) -> (Self, MemoryController) {
        Self::with_availability(Availability::Broken, fault.into(), Vec::new())
    }

    fn with_availability(
        availability: Availability,
        fault: String,
        present: Vec<DeviceId>,
    ) -> (Self, MemoryController) {
        let shared = Shared::new(availability, fault, present);
        (
            Self {
                shared: shared.clone(),
            },
            MemoryController { shared },
        )
    }
}

impl HotplugBackend for MemoryBackend {
    type Source = MemorySource;
    type Device = MemoryDevice;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn probe(&self) -> Result<()> {
        self.shared.probes.fetch_add(1, Ordering::SeqCst);
        let capability = self.shared.acquire()?;
        drop(capability);
        Ok(())
    }

    fn open(&self) -> Result<MemorySource> {
        self.shared.pass_gate();
        let capability = self.shared.acquire()?;
        Ok(MemorySource {
            shared: self.shared.clone(),
            _capability: capability,
        })
    }

    fn open_device(&self, id: &DeviceId) -> MemoryDevice {
        MemoryDevice {
            id: id.clone(),
            shared: self.shared.clone(),
            info_loaded: false,
            ticket: None,
        }
    }

    fn try_create_device(&self, id: &DeviceId) -> Option<(MemoryDevice, CreationState)> {
        let mut device = self.open_device(id);
        if !device.load_info() {
            debug!("Device {} is not readable, skipping", id);
            return None;
        }
        let ticket = self.shared.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        Some((device, CreationState::with(ticket)))
    }

    fn complete_device(&self, id: &DeviceId, device: &mut MemoryDevice, mut state: CreationState) {
        device.ticket = state.take::<u64>();
        lock(&self.shared.completed).push(id.clone());
    }
}

impl MemoryController {
    /// Queue an `add` notification.
    pub fn add(&self, id: impl Into<DeviceId>) {
        self.send(HotplugEvent::add(id));
    }

    /// Queue a `remove` notification.
    pub fn remove(&self, id: impl Into<DeviceId>) {
        self.send(HotplugEvent::remove(id));
    }

    /// Queue an arbitrary notification.
    pub fn send(&self, event: HotplugEvent) {
        self.shared.push(Message::Event(event));
    }

    /// Queue a notification whose fields cannot be extracted.
    pub fn send_unreadable(&self) {
        self.shared.push(Message::Unreadable);
    }

    /// Queue a report that notifications were dropped.
    pub fn overrun(&self) {
        self.shared.push(Message::Overrun);
    }

    /// Make the next wait fail as if interrupted by a signal.
    pub fn interrupt_wait(&self) {
        self.shared.push(Message::Interrupt);
    }

    /// Make the next wait fail for good.
    pub fn fail(&self, reason: impl Into<String>) {
        self.shared.push(Message::Fail(reason.into()));
    }

    /// Close the stream; once the queue drains, waits fail.
    pub fn close(&self) {
        let mut queue = lock(&self.shared.queue);
        queue.closed = true;
        self.shared.ready.notify_all();
    }

    /// Replace what enumeration returns.
    pub fn set_present<I, T>(&self, devices: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<DeviceId>,
    {
        *lock(&self.shared.present) = devices.into_iter().map(Into::into).collect();
    }

    /// Make `load_info` fail (or succeed again) for `id`.
    pub fn set_readable(&self, id: impl Into<DeviceId>, readable: bool) {
        let id = id.into();
        let mut unreadable = lock(&self.shared.unreadable);
        if readable {
            unreadable.remove(&id);
        } else {
            unreadable.insert(id);
        }
    }

    /// Park every following `open` until [`release_open`](Self::release_open).
    pub fn hold_open(&self) {
        lock(&self.shared.gate).closed = true;
    }

    /// Block until some `open` is parked by [`hold_open`](Self::hold_open).
    pub fn wait_open_parked(&self) {
        let mut gate = lock(&self.shared.gate);
        while gate.parked == 0 {
            gate = self
                .shared
                .gate_changed
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Let parked and future `open` calls proceed.
    pub fn release_open(&self) {
        lock(&self.shared.gate).closed = false;
        self.shared.gate_changed.notify_all();
    }

    /// Number of capabilities currently acquired.
    pub fn held_capabilities(&self) -> usize {
        self.shared.held.load(Ordering::SeqCst)
    }

    /// Number of probes made so far.
    pub fn probe_count(&self) -> usize {
        self.shared.probes.load(Ordering::SeqCst)
    }

    /// Identifiers passed to `complete_device`, in call order.
    pub fn completed(&self) -> Vec<DeviceId> {
        lock(&self.shared.completed).clone()
    }

    /// Notifications queued but not yet received.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).messages.len()
    }
}

/// Event source of a [`MemoryBackend`].
pub struct MemorySource {
    shared: Arc<Shared>,
    _capability: Capability,
}

impl EventSource for MemorySource {
    fn enumerate(&mut self) -> Result<Vec<DeviceId>> {
        Ok(lock(&self.shared.present).clone())
    }

    fn wait(&mut self) -> std::result::Result<Readiness, WaitError> {
        let mut queue = lock(&self.shared.queue);
        loop {
            if queue.woken {
                queue.woken = false;
                return Ok(Readiness::Woken);
            }
            let consumed_by_wait = matches!(
                queue.messages.front(),
                Some(Message::Interrupt) | Some(Message::Fail(_))
            );
            if consumed_by_wait {
                return match queue.messages.pop_front() {
                    Some(Message::Fail(reason)) => Err(WaitError::Fatal(reason)),
                    _ => Err(WaitError::Interrupted),
                };
            }
            if !queue.messages.is_empty() {
                return Ok(Readiness::Ready);
            }
            if queue.closed {
                return Err(WaitError::Fatal("event stream closed".to_string()));
            }
            queue = self
                .shared
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn receive(&mut self) -> Result<Option<HotplugEvent>> {
        let message = lock(&self.shared.queue).messages.pop_front();
        match message {
            Some(Message::Event(event)) => Ok(Some(event)),
            Some(Message::Unreadable) => Err(HotplugError::Other(
                "notification fields could not be read".to_string(),
            )),
            Some(Message::Overrun) => Err(HotplugError::EventsLost {
                reason: "in-memory queue overrun".to_string(),
            }),
            Some(_) | None => Ok(None),
        }
    }

    fn interrupter(&self) -> Interrupter {
        let shared = self.shared.clone();
        Interrupter::new(move || {
            let mut queue = lock(&shared.queue);
            queue.woken = true;
            shared.ready.notify_all();
        })
    }
}

/// Device handle of a [`MemoryBackend`].
pub struct MemoryDevice {
    id: DeviceId,
    shared: Arc<Shared>,
    info_loaded: bool,
    ticket: Option<u64>,
}

impl MemoryDevice {
    pub fn info_loaded(&self) -> bool {
        self.info_loaded
    }

    /// Creation ticket handed over by `complete_device`, if it ran.
    pub fn ticket(&self) -> Option<u64> {
        self.ticket
    }
}

impl DeviceHandle for MemoryDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn load_info(&mut self) -> bool {
        self.info_loaded = !lock(&self.shared.unreadable).contains(&self.id);
        self.info_loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Action;

    #[test]
    fn test_enumerate_returns_initial_devices() {
        let (backend, _controller) = MemoryBackend::new(["/dev/path/1", "/dev/path/2"]);
        let mut source = backend.open().unwrap();
        assert_eq!(
            source.enumerate().unwrap(),
            vec![DeviceId::from("/dev/path/1"), DeviceId::from("/dev/path/2")]
        );
    }

    #[test]
    fn test_capability_released_on_drop() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        let source = backend.open().unwrap();
        assert_eq!(controller.held_capabilities(), 1);
        drop(source);
        assert_eq!(controller.held_capabilities(), 0);
    }

    #[test]
    fn test_wait_then_receive() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        let mut source = backend.open().unwrap();
        controller.add("/dev/path/2");

        assert_eq!(source.wait(), Ok(Readiness::Ready));
        let event = source.receive().unwrap().unwrap();
        assert_eq!(event.action, Action::Add);
        assert_eq!(event.device, Some(DeviceId::from("/dev/path/2")));
        assert_eq!(controller.pending(), 0);
    }

    #[test]
    fn test_interrupt_and_fail_are_consumed_by_wait() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        let mut source = backend.open().unwrap();
        controller.interrupt_wait();
        controller.fail("device tree gone");

        assert_eq!(source.wait(), Err(WaitError::Interrupted));
        assert_eq!(
            source.wait(),
            Err(WaitError::Fatal("device tree gone".to_string()))
        );
    }

    #[test]
    fn test_interrupter_wakes_wait() {
        let (backend, _controller) = MemoryBackend::new(Vec::<String>::new());
        let mut source = backend.open().unwrap();
        let interrupter = source.interrupter();

        let waiter = std::thread::spawn(move || source.wait());
        interrupter.interrupt();

        assert_eq!(waiter.join().unwrap(), Ok(Readiness::Woken));
    }

    #[test]
    fn test_overrun_is_reported_by_receive() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        let mut source = backend.open().unwrap();
        controller.overrun();

        assert_eq!(source.wait(), Ok(Readiness::Ready));
        assert!(source.receive().unwrap_err().is_events_lost());
    }

    #[test]
    fn test_held_open_waits_for_release() {
        let (backend, controller) = MemoryBackend::new(["/dev/path/1"]);
        controller.hold_open();

        let opener = std::thread::spawn(move || backend.open().map(|_| ()));
        controller.wait_open_parked();
        assert_eq!(controller.held_capabilities(), 0);

        controller.release_open();
        opener.join().unwrap().unwrap();
    }

    #[test]
    fn test_closed_stream_fails() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        let mut source = backend.open().unwrap();
        controller.close();
        assert!(matches!(source.wait(), Err(WaitError::Fatal(_))));
    }

    #[test]
    fn test_unreadable_device() {
        let (backend, controller) = MemoryBackend::new(["/dev/path/1"]);
        controller.set_readable("/dev/path/1", false);
        assert!(backend.try_create_device(&"/dev/path/1".into()).is_none());

        controller.set_readable("/dev/path/1", true);
        let (device, state) = backend.try_create_device(&"/dev/path/1".into()).unwrap();
        assert!(device.info_loaded());
        assert!(!state.is_empty());
    }

    #[test]
    fn test_capability_check_variants() {
        let (backend, controller) = MemoryBackend::new(Vec::<String>::new());
        assert!(backend.probe().is_ok());
        assert_eq!(controller.probe_count(), 1);
        assert_eq!(controller.held_capabilities(), 0);

        let (absent, _) = MemoryBackend::unavailable();
        assert!(absent.probe().unwrap_err().is_capability_absent());

        let (broken, _) = MemoryBackend::broken("permission denied");
        assert!(!broken.probe().unwrap_err().is_capability_absent());
    }
}
