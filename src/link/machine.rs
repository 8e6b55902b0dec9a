//! The link actor: one task that owns all connection state.
//!
//! ```text
//!   LinkHandle ──Command──┐
//!                         │
//!   Transport ──Event─────┼──► mpsc inbox ──► LinkActor ──► crossbeam ──► listener
//!                         │                      │            LinkEvent
//!   phase timer ─Deadline─┘                      └──► Transport calls
//! ```
//!
//! Every input is handled to completion before the next one is read, so no
//! state is shared and no lock is held. A single phase timer covers the scan
//! window, the negotiation timeout and the reconnect delay. Each arming bumps
//! a generation number and a deadline carrying an older generation is
//! ignored, so a timer that fires after being cancelled has no effect.

use crate::link::scan::{Observation, ScanCoordinator, ScanOutcome};
use crate::link::transport::{
    PermissionCheck, ServiceInfo, Transport, TransportEvent, TransportEvents,
};
use crate::link::types::{ConnectionState, DeviceDescriptor, LinkError, LinkEvent, Operation};
use crate::protocol::{
    decode, CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::stats::SharedLinkStats;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default discovery window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default limit for each negotiation phase.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// How automatic reconnection after a lost stream is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Retry forever without waiting.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Whether the 1-based `attempt` may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Delay before the 1-based `attempt`, doubling each time up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay.max(self.initial_delay))
    }
}

/// Tunables for the link actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub scan_timeout: Duration,
    pub negotiation_timeout: Duration,
    /// Connect to the first device advertising the heart rate service
    pub auto_connect: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            auto_connect: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    StartScan(Option<Duration>),
    StopScan,
    Connect(String),
    Disconnect,
    Dispose(Option<oneshot::Sender<()>>),
}

/// Everything the actor reacts to, in arrival order.
#[derive(Debug)]
pub(crate) enum Input {
    Command(Command),
    Transport(TransportEvent),
    Deadline { generation: u64 },
}

#[derive(Debug)]
struct HandleInner {
    tx: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<ConnectionState>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // Last handle gone: tear the link down.
        let _ = self.tx.send(Input::Command(Command::Dispose(None)));
    }
}

/// Cloneable front door to a running link actor.
///
/// Commands are queued and handled in order; outcomes arrive on the event
/// receiver returned by [`ConnectionStateMachine::spawn`]. Dropping the last
/// handle disposes the link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    inner: Arc<HandleInner>,
}

impl LinkHandle {
    /// Start a discovery window; `None` uses the configured timeout.
    pub fn start_scan(&self, timeout: Option<Duration>) {
        self.send(Command::StartScan(timeout));
    }

    pub fn stop_scan(&self) {
        self.send(Command::StopScan);
    }

    pub fn connect(&self, address: impl Into<String>) {
        self.send(Command::Connect(address.into()));
    }

    /// Close the link and release the radio. The actor stays alive in `Closed`.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Tear everything down and stop the actor. Safe to call more than once.
    pub async fn dispose(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .inner
            .tx
            .send(Input::Command(Command::Dispose(Some(ack_tx))))
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current state as last published by the actor.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Wait until the published state equals `target`, up to `within`.
    pub async fn wait_for_state(&self, target: ConnectionState, within: Duration) -> bool {
        let mut rx = self.inner.state.clone();
        let wait = async move {
            loop {
                if *rx.borrow_and_update() == target {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return *rx.borrow() == target;
                }
            }
        };
        tokio::time::timeout(within, wait).await.unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.is_closed()
    }

    fn send(&self, command: Command) {
        if self.inner.tx.send(Input::Command(command)).is_err() {
            debug!("Link actor has shut down, command dropped");
        }
    }
}

/// Entry point for running a link.
pub struct ConnectionStateMachine;

impl ConnectionStateMachine {
    /// Spawn the actor on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<T, P>(
        mut transport: T,
        permissions: P,
        settings: LinkSettings,
        stats: SharedLinkStats,
    ) -> (LinkHandle, Receiver<LinkEvent>)
    where
        T: Transport,
        P: PermissionCheck,
    {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        transport.attach(TransportEvents::new(inbox_tx.clone()));

        let actor = LinkActor::new(
            transport,
            permissions,
            settings,
            stats,
            state_tx,
            event_tx,
            inbox_tx.clone(),
        );
        tokio::spawn(actor.run(inbox_rx));

        let handle = LinkHandle {
            inner: Arc::new(HandleInner {
                tx: inbox_tx,
                state: state_rx,
            }),
        };
        (handle, event_rx)
    }
}

struct LinkActor<T, P> {
    transport: T,
    permissions: P,
    settings: LinkSettings,
    stats: SharedLinkStats,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: Sender<LinkEvent>,
    /// Used by the phase timer to post deadlines
    inbox: mpsc::UnboundedSender<Input>,
    scan: ScanCoordinator,
    /// Address of the device being connected or streamed
    target: Option<String>,
    /// Address of the last device that reached `Streaming`
    last_streamed: Option<String>,
    reconnect_attempt: u32,
    reconnecting: bool,
    generation: u64,
    deadline: Option<JoinHandle<()>>,
    released: bool,
}

impl<T: Transport, P: PermissionCheck> LinkActor<T, P> {
    fn new(
        transport: T,
        permissions: P,
        settings: LinkSettings,
        stats: SharedLinkStats,
        state_tx: watch::Sender<ConnectionState>,
        events: Sender<LinkEvent>,
        inbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            transport,
            permissions,
            settings,
            stats,
            state: ConnectionState::Idle,
            state_tx,
            events,
            inbox,
            scan: ScanCoordinator::new(HEART_RATE_SERVICE_UUID),
            target: None,
            last_streamed: None,
            reconnect_attempt: 0,
            reconnecting: false,
            generation: 0,
            deadline: None,
            released: false,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = inbox.recv().await {
            match input {
                Input::Command(command) => {
                    if !self.on_command(command) {
                        break;
                    }
                }
                Input::Transport(event) => self.on_transport(event),
                Input::Deadline { generation } => self.on_deadline(generation),
            }
        }
        debug!("Link actor stopped");
    }

    // --- commands ---

    /// Returns false once the actor should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartScan(timeout) => self.start_scan(timeout),
            Command::StopScan => self.stop_scan(),
            Command::Connect(address) => match self.state {
                ConnectionState::Idle | ConnectionState::Scanning => {
                    self.begin_connect(address)
                }
                state => warn!("Ignoring connect to {address} while {state}"),
            },
            Command::Disconnect => {
                if self.state == ConnectionState::Closed {
                    debug!("Disconnect ignored, link already closed");
                } else {
                    self.teardown();
                }
            }
            Command::Dispose(ack) => {
                self.teardown();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return false;
            }
        }
        true
    }

    fn start_scan(&mut self, timeout: Option<Duration>) {
        if !self.state.can_scan() {
            warn!("Ignoring scan request while {}", self.state);
            return;
        }
        if !self.permissions.is_granted(Operation::Scan) {
            self.emit(LinkEvent::Error(LinkError::PermissionDenied(Operation::Scan)));
            return;
        }

        self.scan.begin();
        // Unfiltered, so that devices without the service in their
        // advertisement are still listed for manual selection.
        if let Err(e) = self.transport.start_scan(&[]) {
            self.emit(LinkEvent::Error(LinkError::ScanFailed(e.to_string())));
            self.transition(ConnectionState::Idle);
            return;
        }

        let window = timeout.unwrap_or(self.settings.scan_timeout);
        self.transition(ConnectionState::Scanning);
        self.arm_deadline(window);
        self.status(format!("Scanning for {} ms", window.as_millis()));
    }

    fn stop_scan(&mut self) {
        if self.state != ConnectionState::Scanning {
            debug!("Stop scan ignored while {}", self.state);
            return;
        }
        self.cancel_deadline();
        self.transport.stop_scan();
        let devices = self.scan.cancel();
        self.emit(LinkEvent::ScanComplete(devices));
        self.transition(ConnectionState::Idle);
    }

    fn begin_connect(&mut self, address: String) {
        if self.state == ConnectionState::Scanning {
            self.cancel_deadline();
            self.transport.stop_scan();
            self.scan.cancel();
        }

        if !self.permissions.is_granted(Operation::Connect) {
            self.fail(LinkError::PermissionDenied(Operation::Connect));
            return;
        }

        self.status(format!("Connecting to {address}"));
        self.target = Some(address.clone());
        self.transition(ConnectionState::Connecting);
        self.arm_deadline(self.settings.negotiation_timeout);

        if let Err(e) = self.transport.connect(&address) {
            self.connect_failed(e.to_string());
        }
    }

    // --- transport events ---

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered {
                address,
                name,
                services,
                rssi,
            } => self.on_device(address, name, services, rssi),
            TransportEvent::ScanError(e) => {
                if self.state == ConnectionState::Scanning {
                    self.cancel_deadline();
                    self.transport.stop_scan();
                    self.scan.cancel();
                    self.emit(LinkEvent::Error(LinkError::ScanFailed(e)));
                    self.transition(ConnectionState::Idle);
                }
            }
            TransportEvent::Connected => {
                if self.state != ConnectionState::Connecting {
                    debug!("Unexpected connect callback while {}", self.state);
                    return;
                }
                self.transition(ConnectionState::ServiceDiscovery);
                self.arm_deadline(self.settings.negotiation_timeout);
                if let Err(e) = self.transport.discover_services() {
                    self.fail(LinkError::ServiceNotFound(e.to_string()));
                }
            }
            TransportEvent::ConnectError(e) => {
                if self.state == ConnectionState::Connecting {
                    self.connect_failed(e);
                }
            }
            TransportEvent::ServicesDiscovered(services) => {
                if self.state == ConnectionState::ServiceDiscovery {
                    self.on_services(&services);
                }
            }
            TransportEvent::ServiceDiscoveryError(e) => {
                if self.state == ConnectionState::ServiceDiscovery {
                    self.fail(LinkError::ServiceNotFound(e));
                }
            }
            TransportEvent::SubscribeAck => {
                if self.state != ConnectionState::Subscribing {
                    return;
                }
                self.cancel_deadline();
                self.last_streamed = self.target.clone();
                self.reconnecting = false;
                self.reconnect_attempt = 0;
                self.transition(ConnectionState::Streaming);
                if let Some(address) = &self.target {
                    self.status(format!("Streaming from {address}"));
                }
            }
            TransportEvent::SubscribeRejected(e) => {
                if self.state == ConnectionState::Subscribing {
                    self.fail(LinkError::ServiceNotFound(format!(
                        "notification enable rejected: {e}"
                    )));
                }
            }
            TransportEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value),
            TransportEvent::LinkLost => self.on_link_lost(),
        }
    }

    fn on_device(
        &mut self,
        address: String,
        name: Option<String>,
        services: Vec<Uuid>,
        rssi: Option<i16>,
    ) {
        if self.state != ConnectionState::Scanning {
            debug!("Advertisement from {address} ignored while {}", self.state);
            return;
        }

        let mut device = DeviceDescriptor::new(address, name.as_deref(), services);
        device.rssi = rssi;

        match self.scan.observe(device.clone()) {
            Observation::Duplicate => {}
            Observation::New { priority } => {
                info!(
                    "Found {} ({}){}",
                    device.display_name,
                    device.address,
                    if priority { " advertising heart rate" } else { "" }
                );
                let address = device.address.clone();
                self.emit(LinkEvent::DeviceFound(device));
                if priority && self.settings.auto_connect {
                    self.begin_connect(address);
                }
            }
            Observation::BecamePriority => {
                info!("{} now advertising heart rate", device.address);
                if self.settings.auto_connect {
                    self.begin_connect(device.address);
                }
            }
        }
    }

    fn on_services(&mut self, services: &[ServiceInfo]) {
        let Some(service) = services.iter().find(|s| s.uuid == HEART_RATE_SERVICE_UUID) else {
            self.fail(LinkError::ServiceNotFound(
                "heart rate service not offered".to_string(),
            ));
            return;
        };
        let Some(characteristic) = service.characteristic(&HEART_RATE_MEASUREMENT_UUID) else {
            self.fail(LinkError::ServiceNotFound(
                "heart rate measurement characteristic not offered".to_string(),
            ));
            return;
        };
        let has_descriptor = characteristic
            .descriptors
            .contains(&CLIENT_CHARACTERISTIC_CONFIG_UUID);

        self.transition(ConnectionState::Subscribing);
        self.arm_deadline(self.settings.negotiation_timeout);

        if !self.permissions.is_granted(Operation::Subscribe) {
            self.fail(LinkError::PermissionDenied(Operation::Subscribe));
            return;
        }
        if !has_descriptor {
            self.fail(LinkError::ServiceNotFound(
                "notification descriptor not offered".to_string(),
            ));
            return;
        }

        if let Err(e) = self.transport.enable_notifications(
            HEART_RATE_SERVICE_UUID,
            HEART_RATE_MEASUREMENT_UUID,
            CLIENT_CHARACTERISTIC_CONFIG_UUID,
            &ENABLE_NOTIFICATION_VALUE,
        ) {
            self.fail(LinkError::ServiceNotFound(e.to_string()));
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8]) {
        if self.state != ConnectionState::Streaming {
            debug!("Notification ignored while {}", self.state);
            return;
        }
        if characteristic != HEART_RATE_MEASUREMENT_UUID {
            debug!("Notification from unrelated characteristic {characteristic}");
            return;
        }

        self.stats.record_frame_received();
        match decode(value) {
            Ok(sample) => {
                self.stats.record_frame_decoded(sample.rr_intervals_ms.len());
                self.emit(LinkEvent::Sample(sample));
            }
            Err(e) => {
                self.stats.record_frame_dropped();
                warn!("Dropping measurement frame: {e}");
            }
        }
    }

    fn on_link_lost(&mut self) {
        match self.state {
            ConnectionState::Streaming => {
                self.emit(LinkEvent::Error(LinkError::LinkLost));
                self.transition(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
            state if state.is_negotiating() => {
                self.connect_failed("link lost during negotiation".to_string());
            }
            state => debug!("Link loss ignored while {state}"),
        }
    }

    // --- timer ---

    fn on_deadline(&mut self, generation: u64) {
        if generation != self.generation || self.deadline.take().is_none() {
            debug!("Stale deadline {generation} ignored");
            return;
        }

        match self.state {
            ConnectionState::Scanning => {
                self.transport.stop_scan();
                match self.scan.finish() {
                    ScanOutcome::Failed => {
                        self.emit(LinkEvent::Error(LinkError::ScanFailed(
                            "no devices found".to_string(),
                        )));
                    }
                    ScanOutcome::Complete(devices) => {
                        self.emit(LinkEvent::ScanComplete(devices));
                    }
                }
                self.transition(ConnectionState::Idle);
            }
            ConnectionState::Connecting => {
                self.connect_failed("connection timed out".to_string());
            }
            ConnectionState::ServiceDiscovery => {
                self.fail(LinkError::ServiceNotFound(
                    "service discovery timed out".to_string(),
                ));
            }
            ConnectionState::Subscribing => {
                self.fail(LinkError::ServiceNotFound(
                    "notification enable timed out".to_string(),
                ));
            }
            ConnectionState::Disconnected => self.attempt_reconnect(),
            state => debug!("Deadline ignored while {state}"),
        }
    }

    fn arm_deadline(&mut self, after: Duration) {
        self.cancel_deadline();
        self.generation += 1;
        let generation = self.generation;
        let inbox = self.inbox.clone();
        self.deadline = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inbox.send(Input::Deadline { generation });
        }));
    }

    fn cancel_deadline(&mut self) {
        if let Some(task) = self.deadline.take() {
            task.abort();
        }
    }

    // --- failure and recovery ---

    fn connect_failed(&mut self, reason: String) {
        if self.reconnecting {
            self.cancel_deadline();
            self.transport.disconnect();
            self.emit(LinkEvent::Error(LinkError::ConnectFailed(reason)));
            self.transition(ConnectionState::Disconnected);
            self.schedule_reconnect();
        } else {
            self.fail(LinkError::ConnectFailed(reason));
        }
    }

    /// Terminal failure of the current attempt.
    fn fail(&mut self, error: LinkError) {
        self.cancel_deadline();
        if self.state.is_negotiating() || self.state == ConnectionState::Streaming {
            self.transport.disconnect();
        }
        warn!("Link failed: {error}");
        self.emit(LinkEvent::Error(error));
        self.reconnecting = false;
        self.target = None;
        self.transition(ConnectionState::Failed);
    }

    fn schedule_reconnect(&mut self) {
        if self.last_streamed.is_none() {
            self.fail(LinkError::ConnectFailed("no device to reconnect to".to_string()));
            return;
        }

        let next = self.reconnect_attempt + 1;
        if !self.settings.reconnect.allows(next) {
            self.fail(LinkError::ConnectFailed(format!(
                "gave up after {} reconnect attempts",
                self.reconnect_attempt
            )));
            return;
        }

        let delay = self.settings.reconnect.delay_for(next);
        self.status(format!(
            "Reconnecting in {} ms (attempt {next})",
            delay.as_millis()
        ));
        self.arm_deadline(delay);
    }

    fn attempt_reconnect(&mut self) {
        let Some(address) = self.last_streamed.clone() else {
            return;
        };
        self.reconnect_attempt += 1;
        self.reconnecting = true;
        self.stats.record_reconnect_attempt();
        info!("Reconnect attempt {} to {address}", self.reconnect_attempt);
        self.begin_connect(address);
    }

    /// Cancel timers, stop radio activity, release the transport once.
    fn teardown(&mut self) {
        self.cancel_deadline();
        match self.state {
            ConnectionState::Scanning => {
                self.transport.stop_scan();
                self.scan.cancel();
            }
            state if state.is_negotiating() || state == ConnectionState::Streaming => {
                self.transport.disconnect();
            }
            _ => {}
        }
        if !self.released {
            self.transport.release();
            self.released = true;
        }
        self.reconnecting = false;
        self.target = None;
        self.transition(ConnectionState::Closed);
    }

    // --- output ---

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Link state {from} -> {to}");
        self.state = to;
        self.emit(LinkEvent::StateChanged { from, to });
        self.state_tx.send_replace(to);
    }

    fn status(&self, message: String) {
        debug!("{message}");
        self.emit(LinkEvent::Status(message));
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for link events");
        }
    }
}
