//! Netlink uevent source.
//!
//! The source owns a `NETLINK_KOBJECT_UEVENT` socket bound to the kernel
//! broadcast group and the read end of a self-pipe. Waiting polls both with
//! no timeout; writing to the pipe is how another thread wakes the wait.

use super::sysfs::SysfsLayout;
use super::uevent::Uevent;
use crate::backend::{Action, EventSource, HotplugEvent, Interrupter, Readiness, WaitError};
use crate::config::NetlinkConfig;
use crate::device::DeviceId;
use crate::error::{HotplugError, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{
    bind, recvfrom, setsockopt, socket, sockopt, AddressFamily, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Map socket setup failures: missing netlink support or a sandbox denying
/// it means the capability is absent, anything else is a fault.
fn classify(operation: &'static str, errno: Errno) -> HotplugError {
    match errno {
        Errno::EPROTONOSUPPORT | Errno::EAFNOSUPPORT | Errno::EACCES | Errno::EPERM => {
            HotplugError::unsupported(format!("{operation}: {errno}"))
        }
        other => HotplugError::os(operation, other),
    }
}

/// Open a uevent socket subscribed to kernel broadcasts.
pub(crate) fn open_uevent_socket() -> Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Netlink,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        SockProtocol::NetlinkKObjectUEvent,
    )
    .map_err(|e| classify("socket", e))?;

    bind(
        fd.as_raw_fd(),
        &NetlinkAddr::new(0, NetlinkConfig::KERNEL_GROUP),
    )
    .map_err(|e| classify("bind", e))?;

    Ok(fd)
}

/// Turn one received datagram into an event for `subsystem`.
///
/// Datagrams from senders other than the kernel, malformed datagrams and
/// events of other subsystems yield `None`.
fn decode_datagram(
    sender_port: Option<u32>,
    datagram: &[u8],
    subsystem: &str,
    layout: &SysfsLayout,
) -> Option<HotplugEvent> {
    if sender_port != Some(NetlinkConfig::KERNEL_PORT_ID) {
        debug!("Ignoring uevent from non-kernel sender {:?}", sender_port);
        return None;
    }

    let Some(uevent) = Uevent::parse(datagram) else {
        debug!("Ignoring malformed uevent datagram ({} bytes)", datagram.len());
        return None;
    };
    if uevent.subsystem.as_deref() != Some(subsystem) {
        trace!("Ignoring {} uevent for {:?}", uevent.action, uevent.subsystem);
        return None;
    }

    Some(HotplugEvent::new(
        Action::parse(&uevent.action),
        layout.syspath(&uevent.devpath),
    ))
}

/// Armed uevent stream for one subsystem.
pub struct LinuxSource {
    socket: OwnedFd,
    wake_rx: File,
    wake_tx: Arc<File>,
    layout: SysfsLayout,
    subsystem: String,
    buffer: Vec<u8>,
}

impl LinuxSource {
    pub(crate) fn new(layout: SysfsLayout, subsystem: String, buffer_size: usize) -> Result<Self> {
        let socket = open_uevent_socket()?;
        // The kernel may cap the size; overflows are still caught by receive.
        if let Err(e) = setsockopt(&socket, sockopt::RcvBuf, &NetlinkConfig::SOCKET_RECV_BUFFER) {
            warn!("Failed to enlarge uevent receive buffer: {}", e);
        }
        let (wake_rx, wake_tx) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(|e| HotplugError::os("pipe2", e))?;

        Ok(Self {
            socket,
            wake_rx: File::from(wake_rx),
            wake_tx: Arc::new(File::from(wake_tx)),
            layout,
            subsystem,
            buffer: vec![0; buffer_size],
        })
    }

    fn drain_wakeups(&mut self) {
        let mut scratch = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to drain wake pipe: {}", e);
                    break;
                }
            }
        }
    }
}

impl EventSource for LinuxSource {
    fn enumerate(&mut self) -> Result<Vec<DeviceId>> {
        self.layout.enumerate(&self.subsystem)
    }

    fn wait(&mut self) -> std::result::Result<Readiness, WaitError> {
        let (socket_events, wake_events) = {
            let mut fds = [
                PollFd::new(self.socket.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Err(WaitError::Interrupted),
                Err(e) => return Err(WaitError::Fatal(format!("poll: {e}"))),
            }
            (
                fds[0].revents().unwrap_or(PollFlags::empty()),
                fds[1].revents().unwrap_or(PollFlags::empty()),
            )
        };

        if wake_events.contains(PollFlags::POLLIN) {
            self.drain_wakeups();
            return Ok(Readiness::Woken);
        }
        if socket_events.intersects(PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(WaitError::Fatal(format!(
                "uevent socket closed ({:?})",
                socket_events
            )));
        }
        // POLLERR is left for recvfrom to report, it is usually ENOBUFS.
        if socket_events.intersects(PollFlags::POLLIN | PollFlags::POLLERR) {
            return Ok(Readiness::Ready);
        }
        trace!("poll returned with no ready descriptor");
        Ok(Readiness::Woken)
    }

    fn receive(&mut self) -> Result<Option<HotplugEvent>> {
        let (len, sender) = match recvfrom::<NetlinkAddr>(self.socket.as_raw_fd(), &mut self.buffer)
        {
            Ok(received) => received,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => return Ok(None),
            Err(Errno::ENOBUFS) => {
                return Err(HotplugError::EventsLost {
                    reason: "uevent receive buffer overflowed".to_string(),
                })
            }
            Err(e) => return Err(HotplugError::os("recvfrom", e)),
        };

        let sender_port = sender.map(|addr| addr.pid());
        Ok(decode_datagram(
            sender_port,
            &self.buffer[..len],
            &self.subsystem,
            &self.layout,
        ))
    }

    fn interrupter(&self) -> Interrupter {
        let wake_tx = self.wake_tx.clone();
        Interrupter::new(move || {
            // A full pipe already holds a pending wake.
            if let Err(e) = (&*wake_tx).write_all(&[1]) {
                if e.kind() != ErrorKind::WouldBlock {
                    warn!("Failed to wake device monitor: {}", e);
                }
            }
        })
    }
}
