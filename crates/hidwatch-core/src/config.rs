//! Centralized configuration for hidwatch.
//!
//! Constants shared by the registry, the backends and the CLI. Runtime
//! overrides go through the backend config builders.

/// Registry and monitor defaults.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Kernel subsystem watched by default.
    pub const DEFAULT_SUBSYSTEM: &'static str = "hidraw";
    /// Mount point of sysfs.
    pub const DEFAULT_SYSFS_ROOT: &'static str = "/sys";
    /// Directory holding device nodes.
    pub const DEVNODE_DIR: &'static str = "/dev";
    /// Receive buffer for one kernel uevent datagram.
    pub const RECV_BUFFER_SIZE: usize = 8192;
    /// Capacity of the device change broadcast channel.
    pub const CHANGE_CHANNEL_CAPACITY: usize = 64;
    /// Name of the dedicated monitor thread.
    pub const MONITOR_THREAD_NAME: &'static str = "hidwatch-monitor";
}

/// Kernel netlink constants.
pub struct NetlinkConfig;

impl NetlinkConfig {
    /// Multicast group the kernel broadcasts uevents on.
    pub const KERNEL_GROUP: u32 = 1;
    /// Port id of the kernel as a netlink sender.
    pub const KERNEL_PORT_ID: u32 = 0;
    /// Socket receive buffer requested for bursts of uevents.
    pub const SOCKET_RECV_BUFFER: usize = 1024 * 1024;
}
