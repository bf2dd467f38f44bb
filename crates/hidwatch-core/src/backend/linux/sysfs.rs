//! Sysfs layout and enumeration.

use crate::device::DeviceId;
use crate::error::{HotplugError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paths below a sysfs mount.
#[derive(Debug, Clone)]
pub struct SysfsLayout {
    root: PathBuf,
}

impl SysfsLayout {
    /// Resolve the mount point once so enumerated and event paths agree.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/class`, whose presence tells whether sysfs is mounted.
    pub fn class_root(&self) -> PathBuf {
        self.root.join("class")
    }

    pub fn class_dir(&self, subsystem: &str) -> PathBuf {
        self.class_root().join(subsystem)
    }

    /// Fail with `Unsupported` when there is no sysfs to read.
    pub fn ensure_mounted(&self) -> Result<()> {
        let class_root = self.class_root();
        if class_root.is_dir() {
            Ok(())
        } else {
            Err(HotplugError::unsupported(format!(
                "sysfs class directory {} not found",
                class_root.display()
            )))
        }
    }

    /// Identifier for a kernel `DEVPATH`.
    pub fn syspath(&self, devpath: &str) -> Option<DeviceId> {
        let relative = devpath.trim_start_matches('/');
        if relative.is_empty() {
            return None;
        }
        self.root.join(relative).to_str().and_then(|path| DeviceId::non_empty(path))
    }

    /// Identifiers of every device currently in `class/<subsystem>`, sorted by name.
    pub fn enumerate(&self, subsystem: &str) -> Result<Vec<DeviceId>> {
        let class_dir = self.class_dir(subsystem);
        let entries = match fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The class directory appears with the first device of its kind.
                debug!("{} does not exist yet, no devices", class_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(HotplugError::io_with_path(e, class_dir)),
        };

        let mut links: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => links.push(entry.path()),
                Err(e) => warn!("Skipping unreadable entry in {}: {}", class_dir.display(), e),
            }
        }
        links.sort();

        let mut devices = Vec::with_capacity(links.len());
        for link in links {
            match link.canonicalize() {
                Ok(syspath) => match syspath.to_str().and_then(|path| DeviceId::non_empty(path)) {
                    Some(id) => devices.push(id),
                    None => warn!("Skipping non-UTF-8 syspath {}", syspath.display()),
                },
                Err(e) => warn!("Skipping {}: {}", link.display(), e),
            }
        }
        Ok(devices)
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Fake sysfs trees for tests.

    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::{Path, PathBuf};

    pub const USB_DEVICE_DIR: &str =
        "devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0/0003:046D:C52B.0004";

    /// Create a hidraw node under `root` the way the kernel lays it out and
    /// return its canonical syspath.
    pub fn add_hidraw(root: &Path, parent: &str, node: &str, hid_uevent: &str) -> PathBuf {
        let parent_dir = root.join(parent);
        let node_dir = parent_dir.join("hidraw").join(node);
        fs::create_dir_all(&node_dir).unwrap();
        fs::write(
            node_dir.join("uevent"),
            format!("MAJOR=240\nMINOR=0\nDEVNAME={}\n", node),
        )
        .unwrap();
        fs::write(parent_dir.join("uevent"), hid_uevent).unwrap();
        symlink(&parent_dir, node_dir.join("device")).unwrap();

        let class_dir = root.join("class").join("hidraw");
        fs::create_dir_all(&class_dir).unwrap();
        symlink(&node_dir, class_dir.join(node)).unwrap();
        node_dir.canonicalize().unwrap()
    }
}
