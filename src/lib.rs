//! Heart Link - heart rate sensor link, measurement decoding and HRV.
//!
//! This library manages the Bluetooth LE link to a standard heart rate
//! sensor, decodes its measurement notifications and derives heart rate
//! variability statistics from the beat-to-beat intervals in real time.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Heart Link                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Transport  │──▶│ Link actor  │──▶│   Session   │       │
//! │  │ (btleplug)  │   │ scan/connect│   │ aggregator  │       │
//! │  └─────────────┘   │  + decode   │   └─────────────┘       │
//! │                    └─────────────┘          │              │
//! │                           │                 ▼              │
//! │                           ▼          ┌─────────────┐       │
//! │                    ┌─────────────┐   │ HRV engine  │       │
//! │                    │ Link stats  │   │ + zones     │       │
//! │                    └─────────────┘   └─────────────┘       │
//! │                                             │              │
//! │                                             ▼              │
//! │                                      ┌─────────────┐       │
//! │                                      │ SessionSink │       │
//! │                                      └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use heartlink::{link, stats, AllowAll, ConnectionStateMachine, LinkEvent, LinkSettings};
//!
//! # async fn run() {
//! let (handle, events) = ConnectionStateMachine::spawn(
//!     link::PlatformTransport::new(),
//!     AllowAll,
//!     LinkSettings::default(),
//!     stats::create_shared_stats(),
//! );
//! handle.start_scan(None);
//!
//! while let Ok(event) = events.recv() {
//!     if let LinkEvent::Sample(sample) = event {
//!         println!("{} bpm", sample.heart_rate_bpm);
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod link;
pub mod protocol;
pub mod sink;
pub mod stats;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    BodyProfile, HrvMetrics, RrBuffer, SampleRecord, SessionAggregate, SessionAggregator,
    SessionError, ZoneConfig,
};
pub use link::{
    AllowAll, ConnectionState, ConnectionStateMachine, DeviceDescriptor, LinkError, LinkEvent,
    LinkHandle, LinkSettings, PermissionCheck, ReconnectPolicy, Transport, TransportEvent,
};
pub use protocol::{decode, DecodeError, DecodedSample, SensorContact};
pub use sink::{JsonDirSink, MemorySink, SessionSink, SinkError};
pub use stats::{LinkStats, LinkStatsSnapshot, SharedLinkStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
