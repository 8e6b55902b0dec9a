//! The seam between the link actor and a radio stack.
//!
//! Transport calls are fire-and-forget: a call returns as soon as the
//! operation has been handed to the radio, and the outcome arrives later as
//! a [`TransportEvent`] posted through the [`TransportEvents`] handle given
//! to [`Transport::attach`]. An `Err` return means the operation could not
//! even be started and is treated like the matching failure event.

use crate::link::machine::Input;
use crate::link::types::Operation;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A characteristic resolved during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A service resolved during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// Asynchronous results reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceDiscovered {
        address: String,
        name: Option<String>,
        services: Vec<Uuid>,
        rssi: Option<i16>,
    },
    ScanError(String),
    Connected,
    ConnectError(String),
    ServicesDiscovered(Vec<ServiceInfo>),
    ServiceDiscoveryError(String),
    /// The notification-enable descriptor write was acknowledged.
    SubscribeAck,
    /// The notification-enable descriptor write was rejected.
    SubscribeRejected(String),
    Notification {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    LinkLost,
}

/// Cloneable handle a transport uses to post events to the link actor.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Post an event. Returns false once the actor has shut down.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(Input::Transport(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Errors returned when a transport cannot start an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No radio adapter is available.
    NoAdapter,
    /// The operation requires a connected peripheral.
    NotConnected,
    /// The radio stack refused the operation.
    Backend(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NoAdapter => write!(f, "No Bluetooth adapter available"),
            TransportError::NotConnected => write!(f, "No peripheral connected"),
            TransportError::Backend(e) => write!(f, "Bluetooth error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A radio stack driven by the link actor.
///
/// Only the actor calls these methods, always from its own task.
pub trait Transport: Send + 'static {
    /// Called once before any other method.
    fn attach(&mut self, events: TransportEvents);

    /// Start discovery, optionally filtered to advertisements carrying `services`.
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), TransportError>;

    fn stop_scan(&mut self);

    fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    fn discover_services(&mut self) -> Result<(), TransportError>;

    /// Write `value` to the notification descriptor of a characteristic.
    fn enable_notifications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    fn disconnect(&mut self);

    /// Free every radio resource. Called exactly once.
    fn release(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn attach(&mut self, events: TransportEvents) {
        (**self).attach(events)
    }

    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), TransportError> {
        (**self).start_scan(services)
    }

    fn stop_scan(&mut self) {
        (**self).stop_scan()
    }

    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        (**self).connect(address)
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        (**self).discover_services()
    }

    fn enable_notifications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        (**self).enable_notifications(service, characteristic, descriptor, value)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Decides whether a radio operation may proceed.
pub trait PermissionCheck: Send + Sync + 'static {
    fn is_granted(&self, operation: Operation) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn is_granted(&self, _operation: Operation) -> bool {
        true
    }
}
