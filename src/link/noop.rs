//! Transport used when the crate is built without the `ble` feature.
//!
//! This exists so the crate (and binary) compile on machines without a
//! Bluetooth stack. Every radio operation reports that no adapter exists.

use crate::link::transport::{Transport, TransportError, TransportEvents};
use uuid::Uuid;

/// A transport with no radio behind it.
#[derive(Debug, Default)]
pub struct NoopTransport {
    events: Option<TransportEvents>,
}

impl NoopTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.events.is_some()
    }
}

impl Transport for NoopTransport {
    fn attach(&mut self, events: TransportEvents) {
        self.events = Some(events);
    }

    fn start_scan(&mut self, _services: &[Uuid]) -> Result<(), TransportError> {
        Err(TransportError::NoAdapter)
    }

    fn stop_scan(&mut self) {}

    fn connect(&mut self, _address: &str) -> Result<(), TransportError> {
        Err(TransportError::NoAdapter)
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn enable_notifications(
        &mut self,
        _service: Uuid,
        _characteristic: Uuid,
        _descriptor: Uuid,
        _value: &[u8],
    ) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn disconnect(&mut self) {}

    fn release(&mut self) {
        self.events = None;
    }
}

/// Without a Bluetooth stack there is nothing to ask permission for.
pub fn check_permission() -> bool {
    true
}
