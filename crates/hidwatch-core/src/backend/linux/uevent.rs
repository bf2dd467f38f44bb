//! Kernel uevent parsing.
//!
//! The kernel broadcasts one datagram per device event:
//!
//! ```text
//! add@/devices/pci0000:00/.../hidraw/hidraw3\0ACTION=add\0DEVPATH=...\0SUBSYSTEM=hidraw\0...
//! ```
//!
//! Sysfs `uevent` files carry the same `KEY=VALUE` pairs, one per line.

use std::collections::BTreeMap;

/// A parsed kernel uevent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent {
    pub action: String,
    pub devpath: String,
    pub subsystem: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl Uevent {
    /// Parse one netlink datagram. Returns `None` for anything that is not a
    /// kernel uevent (e.g. a udev daemon message with its binary header).
    ///
    /// The action and device path must be valid UTF-8, so the identifier
    /// built from them matches the one enumeration produces. Other fields
    /// that are not UTF-8 are skipped.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let mut fields = datagram.split(|&b| b == 0).filter(|field| !field.is_empty());

        let header = std::str::from_utf8(fields.next()?).ok()?;
        let (header_action, header_devpath) = header.split_once('@')?;

        let mut malformed_key = false;
        let mut text_fields = Vec::new();
        for field in fields {
            match std::str::from_utf8(field) {
                Ok(text) => text_fields.push(text),
                Err(_) => {
                    if field.starts_with(b"ACTION=") || field.starts_with(b"DEVPATH=") {
                        malformed_key = true;
                    }
                }
            }
        }
        if malformed_key {
            return None;
        }
        let mut properties = parse_key_values(text_fields);

        let action = properties
            .remove("ACTION")
            .unwrap_or_else(|| header_action.to_string());
        let devpath = properties
            .remove("DEVPATH")
            .unwrap_or_else(|| header_devpath.to_string());
        if action.is_empty() || devpath.is_empty() {
            return None;
        }
        let subsystem = properties.remove("SUBSYSTEM");

        Some(Self {
            action,
            devpath,
            subsystem,
            properties,
        })
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Collect `KEY=VALUE` fields; fields without `=` are ignored.
pub(crate) fn parse_key_values<'a>(
    fields: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, String> {
    fields
        .into_iter()
        .filter_map(|field| field.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &[u8] = b"add@/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0/0003:046D:C52B.0004/hidraw/hidraw3\0\
ACTION=add\0\
DEVPATH=/devices/pci0000:00/0000:00:14.0/usb1/1-2/1-2:1.0/0003:046D:C52B.0004/hidraw/hidraw3\0\
SUBSYSTEM=hidraw\0\
MAJOR=240\0\
MINOR=3\0\
DEVNAME=hidraw3\0\
SEQNUM=4711\0";

    #[test]
    fn test_parse_add() {
        let event = Uevent::parse(ADD).unwrap();
        assert_eq!(event.action, "add");
        assert!(event.devpath.ends_with("/hidraw/hidraw3"));
        assert_eq!(event.subsystem.as_deref(), Some("hidraw"));
        assert_eq!(event.property("DEVNAME"), Some("hidraw3"));
        assert_eq!(event.property("SEQNUM"), Some("4711"));
    }

    #[test]
    fn test_header_only() {
        let event = Uevent::parse(b"remove@/devices/virtual/misc/uhid/0005:1234:5678.0001/hidraw/hidraw0\0").unwrap();
        assert_eq!(event.action, "remove");
        assert_eq!(
            event.devpath,
            "/devices/virtual/misc/uhid/0005:1234:5678.0001/hidraw/hidraw0"
        );
        assert_eq!(event.subsystem, None);
    }

    #[test]
    fn test_rejects_udev_daemon_message() {
        assert_eq!(Uevent::parse(b"libudev\0\xfe\xed\xca\xfe"), None);
        assert_eq!(Uevent::parse(b""), None);
    }

    #[test]
    fn test_non_utf8_devpath_is_dropped() {
        assert_eq!(Uevent::parse(b"add@/devices/x/hidraw/hid\xffraw3\0SUBSYSTEM=hidraw\0"), None);
        assert_eq!(
            Uevent::parse(b"add@/devices/x/hidraw/hidraw3\0DEVPATH=/devices/x/hid\xff\0SUBSYSTEM=hidraw\0"),
            None
        );
    }

    #[test]
    fn test_non_utf8_property_is_skipped() {
        let event =
            Uevent::parse(b"add@/devices/x/hidraw/hidraw3\0HID_NAME=caf\xe9\0SUBSYSTEM=hidraw\0")
                .unwrap();
        assert_eq!(event.devpath, "/devices/x/hidraw/hidraw3");
        assert_eq!(event.subsystem.as_deref(), Some("hidraw"));
        assert_eq!(event.property("HID_NAME"), None);
    }

    #[test]
    fn test_parse_key_values_from_file() {
        let text = "DRIVER=hid-generic\nHID_ID=0003:0000046D:0000C52B\nHID_NAME=Logitech USB Receiver\n";
        let values = parse_key_values(text.lines());
        assert_eq!(values.get("HID_ID").map(String::as_str), Some("0003:0000046D:0000C52B"));
        assert_eq!(values.get("HID_NAME").map(String::as_str), Some("Logitech USB Receiver"));
        assert_eq!(values.len(), 3);
    }
}
