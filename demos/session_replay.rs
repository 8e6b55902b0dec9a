//! Replay of a recorded heart rate stream through the full link pipeline.
//!
//! A simulated sensor stands in for the radio: it advertises once, accepts
//! the connection and then plays back measurement frames. The demo shows how
//! to:
//! 1. Spawn the link actor over any [`Transport`]
//! 2. Feed decoded samples into a [`SessionAggregator`]
//! 3. Finalize the session into a [`SessionSink`]
//!
//! Run with: cargo run --example session_replay

use std::time::Duration;

use heartlink::{
    link::{CharacteristicInfo, ServiceInfo, TransportError, TransportEvents},
    protocol::{
        CLIENT_CHARACTERISTIC_CONFIG_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    },
    stats, AllowAll, BodyProfile, ConnectionState, ConnectionStateMachine, LinkEvent,
    LinkSettings, MemorySink, SessionAggregator, Transport, TransportEvent, ZoneConfig,
};
use uuid::Uuid;

const SENSOR_ADDRESS: &str = "C0:FF:EE:00:18:0D";

/// Heart rate and RR intervals (1/1024 s) of a short warm-up.
const RECORDING: &[(u8, &[u16])] = &[
    (72, &[853]),
    (74, &[830, 828]),
    (79, &[778]),
    (86, &[714, 715]),
    (95, &[647]),
    (104, &[591, 590]),
    (118, &[521]),
    (126, &[488, 487]),
    (131, &[469]),
    (128, &[480, 479]),
];

fn measurement_frame(bpm: u8, rr: &[u16]) -> Vec<u8> {
    // RR present, contact supported and detected
    let mut frame = vec![0x16, bpm];
    for raw in rr {
        frame.extend_from_slice(&raw.to_le_bytes());
    }
    frame
}

/// Simulated chest strap.
#[derive(Default)]
struct ReplaySensor {
    events: Option<TransportEvents>,
    playback: Option<tokio::task::JoinHandle<()>>,
}

impl ReplaySensor {
    fn post(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }
}

impl Transport for ReplaySensor {
    fn attach(&mut self, events: TransportEvents) {
        self.events = Some(events);
    }

    fn start_scan(&mut self, _services: &[Uuid]) -> Result<(), TransportError> {
        self.post(TransportEvent::DeviceDiscovered {
            address: SENSOR_ADDRESS.to_string(),
            name: Some("Replay Strap".to_string()),
            services: vec![HEART_RATE_SERVICE_UUID],
            rssi: Some(-48),
        });
        Ok(())
    }

    fn stop_scan(&mut self) {}

    fn connect(&mut self, _address: &str) -> Result<(), TransportError> {
        self.post(TransportEvent::Connected);
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.post(TransportEvent::ServicesDiscovered(vec![ServiceInfo {
            uuid: HEART_RATE_SERVICE_UUID,
            characteristics: vec![CharacteristicInfo {
                uuid: HEART_RATE_MEASUREMENT_UUID,
                descriptors: vec![CLIENT_CHARACTERISTIC_CONFIG_UUID],
            }],
        }]));
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        _service: Uuid,
        characteristic: Uuid,
        _descriptor: Uuid,
        _value: &[u8],
    ) -> Result<(), TransportError> {
        let events = self.events.clone().ok_or(TransportError::NotConnected)?;
        events.send(TransportEvent::SubscribeAck);

        self.playback = Some(tokio::spawn(async move {
            for (bpm, rr) in RECORDING {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let sent = events.send(TransportEvent::Notification {
                    characteristic,
                    value: measurement_frame(*bpm, rr),
                });
                if !sent {
                    return;
                }
            }
        }));
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.playback.take() {
            task.abort();
        }
    }

    fn release(&mut self) {
        self.disconnect();
        self.events = None;
    }
}

fn main() {
    println!("Heart Link - Session Replay");
    println!("===========================");
    println!();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting async runtime: {e}");
            return;
        }
    };
    let _guard = runtime.enter();

    let link_stats = stats::create_shared_stats();
    let (handle, events) = ConnectionStateMachine::spawn(
        ReplaySensor::default(),
        AllowAll,
        LinkSettings::default(),
        link_stats.clone(),
    );
    let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
    let sink = MemorySink::new();

    handle.start_scan(None);

    let mut received = 0;
    while received < RECORDING.len() {
        let event = match events.recv_timeout(Duration::from_secs(5)) {
            Ok(event) => event,
            Err(_) => {
                eprintln!("Replay stalled");
                break;
            }
        };
        match event {
            LinkEvent::StateChanged { to, .. } => {
                println!("[link] {to}");
                if to == ConnectionState::Streaming {
                    println!("Session {}", aggregator.start());
                }
            }
            LinkEvent::DeviceFound(device) => println!("Found {}", device.display_name),
            LinkEvent::Sample(sample) => {
                received += 1;
                match aggregator.on_sample(&sample) {
                    Ok(record) => println!(
                        "  {:>3} bpm  zone {}  rr {:?}",
                        record.heart_rate_bpm, record.zone, record.rr_intervals_ms
                    ),
                    Err(e) => eprintln!("  dropped sample: {e}"),
                }
            }
            LinkEvent::Error(e) => eprintln!("[link] {e}"),
            _ => {}
        }
    }

    runtime.block_on(handle.dispose());

    match aggregator.finalize(&sink) {
        Ok(session) => {
            link_stats.record_session_completed();
            println!();
            println!("Samples:      {}", session.sample_count);
            println!("Average HR:   {:.1} bpm", session.average_hr);
            println!("Max HR:       {} bpm", session.max_hr);
            println!("RMSSD:        {:.1} ms", session.hrv.rmssd_ms);
            println!("SDNN:         {:.1} ms", session.hrv.sdnn_ms);
            println!("HRV score:    {}", session.hrv.score);
            println!("Zone time ms: {:?}", session.zone_times_ms);
        }
        Err(e) => eprintln!("Could not finalize session: {e}"),
    }

    println!();
    println!("{}", link_stats.summary());
    println!("Sessions kept in memory: {}", sink.sessions().len());
}
