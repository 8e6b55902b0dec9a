//! Types shared between the link actor, its transports and listeners.

use crate::protocol::{DecodedSample, HEART_RATE_SERVICE_UUID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A discovered sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Hardware address as reported by the radio
    pub address: String,
    /// Advertised name, or a placeholder built from the address
    pub display_name: String,
    /// Service UUIDs carried in the advertisement
    pub advertised_services: BTreeSet<Uuid>,
    /// Signal strength when known (dBm)
    pub rssi: Option<i16>,
}

impl DeviceDescriptor {
    pub fn new(
        address: impl Into<String>,
        name: Option<&str>,
        advertised_services: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        let address = address.into();
        let display_name = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => unnamed(&address),
        };
        Self {
            address,
            display_name,
            advertised_services: advertised_services.into_iter().collect(),
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Key used to deduplicate advertisements.
    pub fn key(&self) -> String {
        self.address.to_ascii_lowercase()
    }

    pub fn advertises(&self, service: &Uuid) -> bool {
        self.advertised_services.contains(service)
    }

    /// Advertises the heart rate service.
    pub fn is_priority(&self) -> bool {
        self.advertises(&HEART_RATE_SERVICE_UUID)
    }

    /// Whether the advertisement carried a real name.
    pub fn has_name(&self) -> bool {
        self.display_name != unnamed(&self.address)
    }
}

fn unnamed(address: &str) -> String {
    format!("Unknown Device: {address}")
}

/// Lifecycle state of the link to one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Streaming,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States in which the link is being negotiated and a negotiation timeout applies.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::ServiceDiscovery
                | ConnectionState::Subscribing
        )
    }

    /// States from which a scan may be started.
    pub fn can_scan(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ServiceDiscovery => "service discovery",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Radio operations gated by the permission collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Scan,
    Connect,
    Subscribe,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Scan => write!(f, "scan"),
            Operation::Connect => write!(f, "connect"),
            Operation::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Errors reported to listeners, one per failed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The scan window elapsed without any device, or the radio refused to scan.
    ScanFailed(String),
    /// The link could not be established.
    ConnectFailed(String),
    /// The service, characteristic or descriptor is missing, or the
    /// notification-enable write was rejected.
    ServiceNotFound(String),
    /// The permission collaborator denied an operation.
    PermissionDenied(Operation),
    /// An established stream was lost.
    LinkLost,
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::ScanFailed(e) => write!(f, "Scan failed: {e}"),
            LinkError::ConnectFailed(e) => write!(f, "Connection failed: {e}"),
            LinkError::ServiceNotFound(e) => write!(f, "Service not found: {e}"),
            LinkError::PermissionDenied(op) => write!(f, "Permission denied for {op}"),
            LinkError::LinkLost => write!(f, "Link lost"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Everything the link actor reports to its listener.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Human-readable progress message
    Status(String),
    DeviceFound(DeviceDescriptor),
    ScanComplete(Vec<DeviceDescriptor>),
    Sample(DecodedSample),
    Error(LinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let named = DeviceDescriptor::new("AA:BB", Some("Polar H10"), []);
        assert_eq!(named.display_name, "Polar H10");
        assert!(named.has_name());

        let unnamed = DeviceDescriptor::new("AA:BB", None, []);
        assert_eq!(unnamed.display_name, "Unknown Device: AA:BB");
        assert!(!unnamed.has_name());

        let blank = DeviceDescriptor::new("AA:BB", Some("  "), []);
        assert!(!blank.has_name());
    }

    #[test]
    fn test_priority_follows_heart_rate_service() {
        let strap = DeviceDescriptor::new("AA:BB", None, [HEART_RATE_SERVICE_UUID]);
        assert!(strap.is_priority());
        assert!(!DeviceDescriptor::new("CC:DD", Some("Speaker"), []).is_priority());
    }

    #[test]
    fn test_key_ignores_case() {
        let a = DeviceDescriptor::new("aa:bb:cc", None, []);
        let b = DeviceDescriptor::new("AA:BB:CC", None, []);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_advertises() {
        let device = DeviceDescriptor::new("AA", None, [HEART_RATE_SERVICE_UUID]).with_rssi(-60);
        assert!(device.advertises(&HEART_RATE_SERVICE_UUID));
        assert_eq!(device.rssi, Some(-60));
    }

    #[test]
    fn test_state_groups() {
        assert!(ConnectionState::Subscribing.is_negotiating());
        assert!(!ConnectionState::Streaming.is_negotiating());
        assert!(ConnectionState::Failed.can_scan());
        assert!(!ConnectionState::Closed.can_scan());
    }
}
