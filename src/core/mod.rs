//! Signal processing for the Heart Link agent.
//!
//! This module contains:
//! - Time-domain HRV metrics over RR interval snapshots
//! - Heart rate zones and calorie estimates
//! - The session aggregator that folds decoded samples into a summary

pub mod hrv;
pub mod session;
pub mod zones;

// Re-export commonly used types
pub use hrv::{BalanceBand, HrvAssessment, HrvMetrics, RmssdBand, RrBuffer, ScoreBand};
pub use session::{SampleRecord, SessionAggregate, SessionAggregator, SessionError};
pub use zones::{
    estimate_calories, max_heart_rate_for_age, BodyProfile, Sex, ZoneConfig, ZONE_COUNT,
};
