//! Link management for one heart rate sensor.
//!
//! This module provides the connection state machine and the transports it
//! drives. The btleplug transport is compiled in with the `ble` feature; a
//! noop transport stands in otherwise.

pub mod machine;
pub mod scan;
pub mod transport;
pub mod types;

#[cfg(feature = "ble")]
pub mod ble;

#[cfg(not(feature = "ble"))]
pub mod noop;

// Re-export commonly used types
pub use machine::{
    ConnectionStateMachine, LinkHandle, LinkSettings, ReconnectPolicy, DEFAULT_NEGOTIATION_TIMEOUT,
    DEFAULT_SCAN_TIMEOUT,
};
pub use scan::{Observation, ScanCoordinator, ScanOutcome};
pub use transport::{
    AllowAll, CharacteristicInfo, PermissionCheck, ServiceInfo, Transport, TransportError,
    TransportEvent, TransportEvents,
};
pub use types::{ConnectionState, DeviceDescriptor, LinkError, LinkEvent, Operation};

#[cfg(feature = "ble")]
pub use ble::{check_permission, BtleplugTransport};

/// Platform-agnostic transport type alias
#[cfg(feature = "ble")]
pub type PlatformTransport = BtleplugTransport;

#[cfg(not(feature = "ble"))]
pub use noop::{check_permission, NoopTransport};

/// Platform-agnostic transport type alias
#[cfg(not(feature = "ble"))]
pub type PlatformTransport = NoopTransport;
