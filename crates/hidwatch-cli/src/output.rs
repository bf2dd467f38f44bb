//! Rendering of registry data for the terminal.

use hidwatch_core::backend::HidDeviceInfo;
use hidwatch_core::{ChangeKind, DeviceChange, DeviceId};
use serde::Serialize;

/// One device as printed by `list --info`.
#[derive(Debug, Serialize)]
pub struct DeviceLine<'a> {
    pub id: &'a DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<&'a HidDeviceInfo>,
}

pub fn render_id(id: &DeviceId, json: bool) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string(&DeviceLine { id, info: None })?)
    } else {
        Ok(id.to_string())
    }
}

pub fn render_device(line: &DeviceLine<'_>, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(line)?);
    }
    let Some(info) = line.info else {
        return Ok(format!("{} (unreadable)", line.id));
    };
    let mut text = format!(
        "{}  {:04x}:{:04x} {:?}",
        info.devnode.display(),
        info.vendor_id,
        info.product_id,
        info.bus
    );
    if !info.name.is_empty() {
        text.push_str(&format!(" \"{}\"", info.name));
    }
    if let Some(serial) = info.serial.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!(" serial={}", serial));
    }
    Ok(text)
}

pub fn render_change(change: &DeviceChange, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(change)?);
    }
    let sign = match change.kind {
        ChangeKind::Added => '+',
        ChangeKind::Removed => '-',
    };
    Ok(format!("{} {}", sign, change.device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidwatch_core::backend::BusType;
    use std::path::PathBuf;

    fn info() -> HidDeviceInfo {
        HidDeviceInfo {
            devnode: PathBuf::from("/dev/hidraw3"),
            bus: BusType::Usb,
            vendor_id: 0x046d,
            product_id: 0xc52b,
            name: "Logitech USB Receiver".to_string(),
            serial: Some(String::new()),
            phys: None,
        }
    }

    #[test]
    fn test_render_change_text() {
        let added = DeviceChange::added("/dev/path/2".into());
        let removed = DeviceChange::removed("/dev/path/1".into());
        assert_eq!(render_change(&added, false).unwrap(), "+ /dev/path/2");
        assert_eq!(render_change(&removed, false).unwrap(), "- /dev/path/1");
    }

    #[test]
    fn test_render_change_json() {
        let added = DeviceChange::added("/dev/path/2".into());
        let value: serde_json::Value =
            serde_json::from_str(&render_change(&added, true).unwrap()).unwrap();
        assert_eq!(value["kind"], "added");
        assert_eq!(value["device"], "/dev/path/2");
    }

    #[test]
    fn test_render_device_text() {
        let id = DeviceId::from("/sys/devices/x/hidraw/hidraw3");
        let info = info();
        let line = DeviceLine {
            id: &id,
            info: Some(&info),
        };
        assert_eq!(
            render_device(&line, false).unwrap(),
            "/dev/hidraw3  046d:c52b Usb \"Logitech USB Receiver\""
        );

        let unreadable = DeviceLine { id: &id, info: None };
        assert!(render_device(&unreadable, false)
            .unwrap()
            .ends_with("(unreadable)"));
    }

    #[test]
    fn test_render_id_json_omits_info() {
        let id = DeviceId::from("A");
        assert_eq!(render_id(&id, true).unwrap(), r#"{"id":"A"}"#);
        assert_eq!(render_id(&id, false).unwrap(), "A");
    }
}
