//! hidraw device handles.

use super::uevent::parse_key_values;
use crate::device::{DeviceHandle, DeviceId};
use crate::error::{HotplugError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bus a HID device is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    Usb,
    Bluetooth,
    I2c,
    Virtual,
    Other(u16),
}

impl From<u16> for BusType {
    fn from(code: u16) -> Self {
        // Values from linux/input.h
        match code {
            0x03 => BusType::Usb,
            0x05 => BusType::Bluetooth,
            0x06 => BusType::Virtual,
            0x18 => BusType::I2c,
            other => BusType::Other(other),
        }
    }
}

/// Descriptive info of a hidraw device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidDeviceInfo {
    /// Device node, e.g. `/dev/hidraw3`.
    pub devnode: PathBuf,
    pub bus: BusType,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub serial: Option<String>,
    pub phys: Option<String>,
}

/// A hidraw device identified by its syspath.
#[derive(Debug)]
pub struct HidrawDevice {
    id: DeviceId,
    devnode_dir: PathBuf,
    info: Option<HidDeviceInfo>,
}

impl HidrawDevice {
    pub fn new(id: DeviceId, devnode_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            devnode_dir: devnode_dir.into(),
            info: None,
        }
    }

    pub fn syspath(&self) -> &Path {
        Path::new(self.id.as_str())
    }

    /// Info from the last successful `load_info`.
    pub fn info(&self) -> Option<&HidDeviceInfo> {
        self.info.as_ref()
    }

    fn read_info(&self) -> Result<HidDeviceInfo> {
        let node = read_uevent(&self.syspath().join("uevent"))?;
        let devname = node
            .get("DEVNAME")
            .ok_or_else(|| HotplugError::Other(format!("{} has no DEVNAME", self.id)))?;

        let hid = read_uevent(&self.syspath().join("device").join("uevent"))?;
        let hid_id = hid
            .get("HID_ID")
            .ok_or_else(|| HotplugError::Other(format!("{} has no HID_ID", self.id)))?;
        let (bus, vendor_id, product_id) = parse_hid_id(hid_id)?;

        Ok(HidDeviceInfo {
            devnode: self.devnode_dir.join(devname),
            bus,
            vendor_id,
            product_id,
            name: hid.get("HID_NAME").cloned().unwrap_or_default(),
            serial: non_empty(hid.get("HID_UNIQ")),
            phys: non_empty(hid.get("HID_PHYS")),
        })
    }
}

impl DeviceHandle for HidrawDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn load_info(&mut self) -> bool {
        match self.read_info() {
            Ok(info) => {
                self.info = Some(info);
                true
            }
            Err(e) => {
                debug!("Could not load info for {}: {}", self.id, e);
                self.info = None;
                false
            }
        }
    }
}

fn read_uevent(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path).map_err(|e| HotplugError::io_with_path(e, path))?;
    Ok(parse_key_values(text.lines()))
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Parse `HID_ID=BBBB:VVVVVVVV:PPPPPPPP` (hex bus, vendor and product).
pub fn parse_hid_id(value: &str) -> Result<(BusType, u16, u16)> {
    let malformed = || HotplugError::Other(format!("malformed HID_ID '{}'", value));

    let mut parts = value.split(':');
    let (Some(bus), Some(vendor), Some(product), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let hex = |s: &str| u32::from_str_radix(s, 16).map_err(|_| malformed());
    let narrow = |n: u32| u16::try_from(n).map_err(|_| malformed());

    Ok((
        BusType::from(narrow(hex(bus)?)?),
        narrow(hex(vendor)?)?,
        narrow(hex(product)?)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::super::sysfs::fixture::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_hid_id() {
        assert_eq!(
            parse_hid_id("0003:0000046D:0000C52B").unwrap(),
            (BusType::Usb, 0x046d, 0xc52b)
        );
        assert_eq!(
            parse_hid_id("0005:0000057E:00002009").unwrap(),
            (BusType::Bluetooth, 0x057e, 0x2009)
        );
        assert_eq!(parse_hid_id("0019:1:2").unwrap().0, BusType::Other(0x19));
        assert!(parse_hid_id("0003:0000046D").is_err());
        assert!(parse_hid_id("0003:0001046D:0000C52B").is_err());
        assert!(parse_hid_id("zz:1:2").is_err());
    }

    #[test]
    fn test_load_info() {
        let temp = TempDir::new().unwrap();
        let syspath = add_hidraw(
            temp.path(),
            USB_DEVICE_DIR,
            "hidraw3",
            "HID_ID=0003:0000046D:0000C52B\nHID_NAME=Logitech USB Receiver\nHID_PHYS=usb-0000:00:14.0-2/input0\nHID_UNIQ=\n",
        );
        let mut device = HidrawDevice::new(DeviceId::new(syspath.to_string_lossy()), "/dev");

        assert!(device.load_info());
        let info = device.info().unwrap();
        assert_eq!(info.devnode, PathBuf::from("/dev/hidraw3"));
        assert_eq!(info.bus, BusType::Usb);
        assert_eq!(info.vendor_id, 0x046d);
        assert_eq!(info.product_id, 0xc52b);
        assert_eq!(info.name, "Logitech USB Receiver");
        assert_eq!(info.serial, None);
        assert_eq!(info.phys.as_deref(), Some("usb-0000:00:14.0-2/input0"));
    }

    #[test]
    fn test_load_info_vanished_device() {
        let temp = TempDir::new().unwrap();
        let syspath = add_hidraw(temp.path(), USB_DEVICE_DIR, "hidraw3", "HID_NAME=x\n");
        let mut missing_id = HidrawDevice::new(DeviceId::new(syspath.to_string_lossy()), "/dev");
        assert!(!missing_id.load_info());
        assert!(missing_id.info().is_none());

        let mut gone = HidrawDevice::new(
            DeviceId::new(temp.path().join("devices/gone/hidraw/hidraw9").to_string_lossy()),
            "/dev",
        );
        assert!(!gone.load_info());
    }
}
