//! Kernel hot-plug events.
//!
//! The kernel broadcasts one datagram per device state change:
//!
//! ```text
//! add@/devices/pci0000:00/0000:00:02.0\0ACTION=add\0SUBSYSTEM=pci\0MODALIAS=pci:v...\0
//! ```
//!
//! - `socket`: the `NETLINK_KOBJECT_UEVENT` socket
//! - `listener`: the receive loop feeding parsed events to a dispatcher
//! - `trigger`: ask the kernel to replay `add` for devices already present

pub mod listener;
pub mod socket;
pub mod trigger;

pub use listener::{pump, serve, DatagramSource};
pub use socket::UeventSocket;

use thiserror::Error;

pub const ACTION_ADD: &str = "add";
pub const MODALIAS: &str = "MODALIAS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UeventError {
    #[error("empty datagram")]
    Empty,
    /// Header without `@`, e.g. the `libudev` monitor protocol.
    #[error("not a kernel uevent (header {0:?})")]
    NotKernelEvent(String),
}

/// One parsed device event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: String,
    pub device_path: String,
    /// Environment-style attributes in datagram order.
    pub attributes: Vec<(String, String)>,
}

impl HotplugEvent {
    /// Parse a raw datagram.
    ///
    /// Fields without `=` after the header are dropped; keys are not
    /// interpreted.
    pub fn parse(datagram: &[u8]) -> Result<Self, UeventError> {
        let mut fields = datagram
            .split(|&b| b == 0)
            .filter(|f| !f.is_empty())
            .map(String::from_utf8_lossy);

        let header = fields.next().ok_or(UeventError::Empty)?;
        let (action, device_path) = header
            .split_once('@')
            .ok_or_else(|| UeventError::NotKernelEvent(header.to_string()))?;

        let attributes = fields
            .filter_map(|field| {
                field
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();

        Ok(Self {
            action: action.to_string(),
            device_path: device_path.to_string(),
            attributes,
        })
    }

    /// Value of attribute `key`; the last occurrence wins.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn modalias(&self) -> Option<&str> {
        self.attribute(MODALIAS)
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.attribute("SUBSYSTEM")
    }

    pub fn is_add(&self) -> bool {
        self.action == ACTION_ADD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pci_add() {
        let datagram = b"add@/devices/pci0000:00/0000:00:02.0\0ACTION=add\0SUBSYSTEM=pci\0MODALIAS=pci:v00008086d00001234sv0sd0bc03sc00i00";
        let event = HotplugEvent::parse(datagram).unwrap();

        assert_eq!(event.action, "add");
        assert_eq!(event.device_path, "/devices/pci0000:00/0000:00:02.0");
        assert_eq!(event.modalias(), Some("pci:v00008086d00001234sv0sd0bc03sc00i00"));
        assert_eq!(event.subsystem(), Some("pci"));
        assert!(event.is_add());
        assert_eq!(event.attributes.len(), 3);
    }

    #[test]
    fn test_parse_drops_fields_without_equals() {
        let event = HotplugEvent::parse(b"remove@/devices/x\0junk\0SEQNUM=42\0\0").unwrap();
        assert_eq!(event.action, "remove");
        assert_eq!(
            event.attributes,
            vec![("SEQNUM".to_string(), "42".to_string())]
        );
        assert!(!event.is_add());
    }

    #[test]
    fn test_value_keeps_later_equals() {
        let event = HotplugEvent::parse(b"change@/d\0PARAM=a=b\0").unwrap();
        assert_eq!(event.attribute("PARAM"), Some("a=b"));
    }

    #[test]
    fn test_rejects_non_kernel_messages() {
        assert_eq!(HotplugEvent::parse(b"").unwrap_err(), UeventError::Empty);
        assert_eq!(
            HotplugEvent::parse(b"libudev\0\xfe\xed\xca\xfe").unwrap_err(),
            UeventError::NotKernelEvent("libudev".to_string())
        );
    }
}
