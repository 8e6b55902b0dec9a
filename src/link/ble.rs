//! btleplug implementation of the transport.
//!
//! Each transport call spawns a tokio task that performs the async btleplug
//! operation and reports the outcome through [`TransportEvents`]. Long-lived
//! tasks (the advertisement stream, the disconnect watcher and the
//! notification stream) are kept so they can be aborted on stop, disconnect
//! and release.

use crate::link::transport::{
    CharacteristicInfo, ServiceInfo, Transport, TransportError, TransportEvent, TransportEvents,
};
use btleplug::api::{BDAddr, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Talks to the first Bluetooth adapter of the host.
#[derive(Default)]
pub struct BtleplugTransport {
    events: Option<TransportEvents>,
    adapter: Arc<Mutex<Option<Adapter>>>,
    peripheral: Arc<Mutex<Option<Peripheral>>>,
    scan_task: Option<JoinHandle<()>>,
    link_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> Result<TransportEvents, TransportError> {
        self.events
            .clone()
            .ok_or_else(|| TransportError::Backend("transport not attached".to_string()))
    }

    fn abort_link_tasks(&mut self) {
        for task in [self.link_task.take(), self.notify_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("attached", &self.events.is_some())
            .field("scanning", &self.scan_task.is_some())
            .finish()
    }
}

fn backend(e: btleplug::Error) -> TransportError {
    TransportError::Backend(e.to_string())
}

/// The adapter, opened on first use.
async fn adapter_for(slot: &Mutex<Option<Adapter>>) -> Result<Adapter, TransportError> {
    let mut slot = slot.lock().await;
    if let Some(adapter) = slot.as_ref() {
        return Ok(adapter.clone());
    }
    let manager = Manager::new().await.map_err(backend)?;
    let adapter = manager
        .adapters()
        .await
        .map_err(backend)?
        .into_iter()
        .next()
        .ok_or(TransportError::NoAdapter)?;
    *slot = Some(adapter.clone());
    Ok(adapter)
}

/// Address reported to the link actor. Some platforms hide the hardware
/// address and report all zeroes, in which case the peripheral id is used.
fn address_of(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Peripheral, TransportError> {
    for peripheral in adapter.peripherals().await.map_err(backend)? {
        if address_of(&peripheral).eq_ignore_ascii_case(address) {
            return Ok(peripheral);
        }
    }
    Err(TransportError::Backend(format!("device {address} not found")))
}

impl Transport for BtleplugTransport {
    fn attach(&mut self, events: TransportEvents) {
        self.events = Some(events);
    }

    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), TransportError> {
        let events = self.events()?;
        let slot = self.adapter.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };

        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        self.scan_task = Some(tokio::spawn(async move {
            let adapter = match adapter_for(&slot).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    events.send(TransportEvent::ScanError(e.to_string()));
                    return;
                }
            };
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    events.send(TransportEvent::ScanError(e.to_string()));
                    return;
                }
            };
            if let Err(e) = adapter.start_scan(filter).await {
                events.send(TransportEvent::ScanError(e.to_string()));
                return;
            }
            debug!("btleplug scan started");

            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                let sent = events.send(TransportEvent::DeviceDiscovered {
                    address: address_of(&peripheral),
                    name: props.local_name,
                    services: props.services,
                    rssi: props.rssi,
                });
                if !sent {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        let slot = self.adapter.clone();
        tokio::spawn(async move {
            if let Some(adapter) = slot.lock().await.as_ref() {
                if let Err(e) = adapter.stop_scan().await {
                    debug!("btleplug stop_scan failed: {e}");
                }
            }
        });
    }

    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        let events = self.events()?;
        let slot = self.adapter.clone();
        let current = self.peripheral.clone();
        let address = address.to_string();

        self.abort_link_tasks();
        self.link_task = Some(tokio::spawn(async move {
            let adapter = match adapter_for(&slot).await {
                Ok(adapter) => adapter,
                Err(e) => {
                    events.send(TransportEvent::ConnectError(e.to_string()));
                    return;
                }
            };
            let peripheral = match find_peripheral(&adapter, &address).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    events.send(TransportEvent::ConnectError(e.to_string()));
                    return;
                }
            };

            // Subscribe before connecting so a drop right after connect is seen.
            let mut central_events = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    events.send(TransportEvent::ConnectError(e.to_string()));
                    return;
                }
            };
            if let Err(e) = peripheral.connect().await {
                events.send(TransportEvent::ConnectError(e.to_string()));
                return;
            }
            info!("Connected to {address}");

            let id = peripheral.id();
            *current.lock().await = Some(peripheral);
            if !events.send(TransportEvent::Connected) {
                return;
            }

            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(lost) = event {
                    if lost == id {
                        warn!("Device {address} disconnected");
                        current.lock().await.take();
                        events.send(TransportEvent::LinkLost);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        let events = self.events()?;
        let current = self.peripheral.clone();

        tokio::spawn(async move {
            let Some(peripheral) = current.lock().await.clone() else {
                events.send(TransportEvent::ServiceDiscoveryError(
                    TransportError::NotConnected.to_string(),
                ));
                return;
            };
            if let Err(e) = peripheral.discover_services().await {
                events.send(TransportEvent::ServiceDiscoveryError(e.to_string()));
                return;
            }

            let services = peripheral
                .services()
                .into_iter()
                .map(|service| ServiceInfo {
                    uuid: service.uuid,
                    characteristics: service
                        .characteristics
                        .into_iter()
                        .map(|c| CharacteristicInfo {
                            uuid: c.uuid,
                            descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                        })
                        .collect(),
                })
                .collect();
            events.send(TransportEvent::ServicesDiscovered(services));
        });
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let events = self.events()?;
        let current = self.peripheral.clone();
        // btleplug writes the configuration descriptor itself on subscribe.
        debug!(
            "Enabling notifications on {characteristic} via {descriptor} ({:02x?})",
            value
        );

        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.notify_task = Some(tokio::spawn(async move {
            let Some(peripheral) = current.lock().await.clone() else {
                events.send(TransportEvent::SubscribeRejected(
                    TransportError::NotConnected.to_string(),
                ));
                return;
            };
            let Some(target) = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic && c.service_uuid == service)
            else {
                events.send(TransportEvent::SubscribeRejected(format!(
                    "characteristic {characteristic} not found"
                )));
                return;
            };

            // Take the stream first so no notification is lost after subscribing.
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    events.send(TransportEvent::SubscribeRejected(e.to_string()));
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                events.send(TransportEvent::SubscribeRejected(e.to_string()));
                return;
            }
            if !events.send(TransportEvent::SubscribeAck) {
                return;
            }

            while let Some(notification) = notifications.next().await {
                let sent = events.send(TransportEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                });
                if !sent {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.abort_link_tasks();
        let current = self.peripheral.clone();
        tokio::spawn(async move {
            if let Some(peripheral) = current.lock().await.take() {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("btleplug disconnect failed: {e}");
                }
            }
        });
    }

    fn release(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        self.abort_link_tasks();
        self.events = None;

        let adapter = self.adapter.clone();
        let current = self.peripheral.clone();
        tokio::spawn(async move {
            if let Some(peripheral) = current.lock().await.take() {
                let _ = peripheral.disconnect().await;
            }
            adapter.lock().await.take();
        });
    }
}

/// The operating system prompts for Bluetooth access on first use.
pub fn check_permission() -> bool {
    true
}
