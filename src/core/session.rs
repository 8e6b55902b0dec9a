//! Session-scoped aggregation of decoded samples.
//!
//! A [`SessionAggregator`] is fed from the link's delivery path while the
//! sensor streams and finalized once when monitoring stops. All mutable state
//! sits behind one mutex so that `on_sample` and `stop` never interleave; HRV
//! is computed from a copy of the RR buffer after the lock is released.

use crate::core::hrv::{HrvMetrics, RrBuffer};
use crate::core::zones::{estimate_calories, BodyProfile, ZoneConfig, ZONE_COUNT};
use crate::protocol::DecodedSample;
use crate::sink::{SessionSink, SinkError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Finalized summary of one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Mean heart rate over all samples (bpm)
    pub average_hr: f64,
    /// Highest heart rate seen (bpm)
    pub max_hr: u16,
    /// Number of samples aggregated
    pub sample_count: u64,
    /// Estimated energy expenditure (kcal)
    pub calories_estimate: u32,
    /// Milliseconds spent in zones 1 through 5
    pub zone_times_ms: [u64; ZONE_COUNT],
    /// Milliseconds the session spent paused
    #[serde(default)]
    pub paused_ms: u64,
    /// HRV metrics over the full RR buffer
    pub hrv: HrvMetrics,
}

impl SessionAggregate {
    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }

    /// Milliseconds between start and end, excluding pauses.
    pub fn active_ms(&self) -> u64 {
        let total = (self.end_time - self.start_time).num_milliseconds().max(0) as u64;
        total.saturating_sub(self.paused_ms)
    }

    /// Active time rounded to the nearest minute.
    pub fn duration_minutes(&self) -> u32 {
        u32::try_from((self.active_ms() + 30_000) / 60_000).unwrap_or(u32::MAX)
    }
}

/// Per-sample record handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub heart_rate_bpm: u16,
    pub rr_intervals_ms: Vec<u16>,
    pub zone: u8,
}

/// Errors returned by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was never called.
    NotStarted,
    /// The session was already stopped.
    Closed,
    /// The session is paused and does not take samples.
    Paused,
    /// The persistence collaborator rejected the aggregate.
    Sink(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotStarted => write!(f, "Session has not been started"),
            SessionError::Closed => write!(f, "Session is closed"),
            SessionError::Paused => write!(f, "Session is paused"),
            SessionError::Sink(e) => write!(f, "Session sink error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SinkError> for SessionError {
    fn from(e: SinkError) -> Self {
        SessionError::Sink(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    Paused,
    Closed,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    session_id: Uuid,
    start_time: DateTime<Utc>,
    hr_sum: u64,
    hr_count: u64,
    max_hr: u16,
    zone_times_ms: [u64; ZONE_COUNT],
    /// Time and zone of the previous sample
    last_reading: Option<(DateTime<Utc>, u8)>,
    paused_at: Option<DateTime<Utc>>,
    paused_ms: u64,
    rr: RrBuffer,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            session_id: Uuid::new_v4(),
            start_time: Utc::now(),
            hr_sum: 0,
            hr_count: 0,
            max_hr: 0,
            zone_times_ms: [0; ZONE_COUNT],
            last_reading: None,
            paused_at: None,
            paused_ms: 0,
            rr: RrBuffer::new(),
        }
    }

    /// Credit the time since the previous sample to that sample's zone.
    fn attribute_elapsed(&mut self, now: DateTime<Utc>) {
        if let Some((last_at, last_zone)) = self.last_reading {
            let elapsed = (now - last_at).num_milliseconds().max(0) as u64;
            self.zone_times_ms[usize::from(last_zone - 1)] += elapsed;
        }
    }

    /// Close an open pause at `now`.
    fn end_pause(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_ms += (now - paused_at).num_milliseconds().max(0) as u64;
        }
    }
}

/// Accumulates decoded samples into a session aggregate.
#[derive(Debug)]
pub struct SessionAggregator {
    zones: ZoneConfig,
    profile: BodyProfile,
    state: Mutex<SessionState>,
}

impl SessionAggregator {
    /// Create an aggregator using caller-provided zone bounds and profile.
    pub fn new(zones: ZoneConfig, profile: BodyProfile) -> Self {
        Self {
            zones,
            profile,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Begin a new session now, discarding anything accumulated before.
    pub fn start(&self) -> Uuid {
        self.start_at(Utc::now())
    }

    pub fn start_at(&self, at: DateTime<Utc>) -> Uuid {
        let mut state = self.lock();
        *state = SessionState::new();
        state.phase = Phase::Active;
        state.start_time = at;
        state.session_id
    }

    /// Aggregate one decoded sample received now.
    pub fn on_sample(&self, sample: &DecodedSample) -> Result<SampleRecord, SessionError> {
        self.on_sample_at(sample, Utc::now())
    }

    pub fn on_sample_at(
        &self,
        sample: &DecodedSample,
        at: DateTime<Utc>,
    ) -> Result<SampleRecord, SessionError> {
        let mut state = self.lock();
        match state.phase {
            Phase::Idle => return Err(SessionError::NotStarted),
            Phase::Closed => return Err(SessionError::Closed),
            Phase::Paused => return Err(SessionError::Paused),
            Phase::Active => {}
        }

        let zone = self.zones.zone_for(sample.heart_rate_bpm);
        state.attribute_elapsed(at);
        state.last_reading = Some((at, zone));

        state.hr_sum += u64::from(sample.heart_rate_bpm);
        state.hr_count += 1;
        state.max_hr = state.max_hr.max(sample.heart_rate_bpm);
        state.rr.extend_from_slice(&sample.rr_intervals_ms);

        Ok(SampleRecord {
            session_id: state.session_id,
            timestamp: at,
            heart_rate_bpm: sample.heart_rate_bpm,
            rr_intervals_ms: sample.rr_intervals_ms.clone(),
            zone,
        })
    }

    /// Close the session now and compute the final aggregate.
    pub fn stop(&self) -> Result<SessionAggregate, SessionError> {
        self.stop_at(Utc::now())
    }

    pub fn stop_at(&self, at: DateTime<Utc>) -> Result<SessionAggregate, SessionError> {
        let (partial, rr) = {
            let mut state = self.lock();
            match state.phase {
                Phase::Idle => return Err(SessionError::NotStarted),
                Phase::Closed => return Err(SessionError::Closed),
                Phase::Paused => state.end_pause(at),
                Phase::Active => state.attribute_elapsed(at),
            }
            state.phase = Phase::Closed;
            state.last_reading = None;

            let average_hr = if state.hr_count == 0 {
                0.0
            } else {
                state.hr_sum as f64 / state.hr_count as f64
            };

            let partial = SessionAggregate {
                session_id: state.session_id,
                start_time: state.start_time,
                end_time: at.max(state.start_time),
                average_hr,
                max_hr: state.max_hr,
                sample_count: state.hr_count,
                calories_estimate: 0,
                zone_times_ms: state.zone_times_ms,
                paused_ms: state.paused_ms,
                hrv: HrvMetrics::default(),
            };
            (partial, state.rr.snapshot())
        };

        let hrv = HrvMetrics::compute(&rr);
        let calories_estimate = if partial.sample_count == 0 {
            0
        } else {
            estimate_calories(partial.average_hr, &self.profile, partial.duration_minutes())
        };

        Ok(SessionAggregate {
            hrv,
            calories_estimate,
            ..partial
        })
    }

    /// Suspend the session now. Time until resume counts toward no zone.
    pub fn pause(&self) -> Result<(), SessionError> {
        self.pause_at(Utc::now())
    }

    pub fn pause_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        let mut state = self.lock();
        match state.phase {
            Phase::Idle => Err(SessionError::NotStarted),
            Phase::Closed => Err(SessionError::Closed),
            Phase::Paused => Ok(()),
            Phase::Active => {
                state.attribute_elapsed(at);
                state.last_reading = state.last_reading.map(|(_, zone)| (at, zone));
                state.paused_at = Some(at);
                state.phase = Phase::Paused;
                Ok(())
            }
        }
    }

    /// Continue a paused session now. The zone of the last sample before
    /// the pause keeps accruing until the next sample arrives.
    pub fn resume(&self) -> Result<(), SessionError> {
        self.resume_at(Utc::now())
    }

    pub fn resume_at(&self, at: DateTime<Utc>) -> Result<(), SessionError> {
        let mut state = self.lock();
        match state.phase {
            Phase::Idle => Err(SessionError::NotStarted),
            Phase::Closed => Err(SessionError::Closed),
            Phase::Active => Ok(()),
            Phase::Paused => {
                state.end_pause(at);
                state.last_reading = state.last_reading.map(|(_, zone)| (at, zone));
                state.phase = Phase::Active;
                Ok(())
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().phase == Phase::Paused
    }

    /// Stop the session and hand the aggregate to the persistence collaborator.
    pub fn finalize(&self, sink: &dyn SessionSink) -> Result<SessionAggregate, SessionError> {
        let aggregate = self.stop()?;
        sink.persist_session(&aggregate)?;
        Ok(aggregate)
    }

    /// HRV over the intervals received so far.
    pub fn current_metrics(&self) -> HrvMetrics {
        HrvMetrics::compute(&self.rr_snapshot())
    }

    /// Copy of the RR buffer.
    pub fn rr_snapshot(&self) -> Vec<u16> {
        self.lock().rr.snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.lock().phase == Phase::Active
    }

    pub fn zones(&self) -> &ZoneConfig {
        &self.zones
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock cannot leave the counters torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorContact;
    use chrono::Duration;

    fn sample(bpm: u16, rr: &[u16]) -> DecodedSample {
        DecodedSample {
            heart_rate_bpm: bpm,
            rr_intervals_ms: rr.to_vec(),
            energy_expended: None,
            sensor_contact: SensorContact::Unsupported,
        }
    }

    #[test]
    fn test_running_aggregates() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);

        aggregator.on_sample_at(&sample(80, &[750]), t0).unwrap();
        aggregator
            .on_sample_at(&sample(100, &[600, 610]), t0 + Duration::seconds(1))
            .unwrap();
        aggregator
            .on_sample_at(&sample(120, &[]), t0 + Duration::seconds(2))
            .unwrap();

        let aggregate = aggregator.stop_at(t0 + Duration::seconds(3)).unwrap();
        assert_eq!(aggregate.sample_count, 3);
        assert_eq!(aggregate.max_hr, 120);
        assert!((aggregate.average_hr - 100.0).abs() < 1e-9);
        assert_eq!(aggregate.hrv.sample_count, 3);
    }

    #[test]
    fn test_zone_time_attribution() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);

        // zone 1 for 2 s, zone 3 for 1 s, then zone 5 until stop (4 s)
        aggregator.on_sample_at(&sample(70, &[]), t0).unwrap();
        let record = aggregator
            .on_sample_at(&sample(140, &[]), t0 + Duration::seconds(2))
            .unwrap();
        assert_eq!(record.zone, 3);
        aggregator
            .on_sample_at(&sample(180, &[]), t0 + Duration::seconds(3))
            .unwrap();

        let aggregate = aggregator.stop_at(t0 + Duration::seconds(7)).unwrap();
        assert_eq!(aggregate.zone_times_ms, [2000, 0, 1000, 0, 4000]);
    }

    #[test]
    fn test_sample_after_stop_is_rejected() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        assert_eq!(
            aggregator.on_sample(&sample(70, &[])),
            Err(SessionError::NotStarted)
        );

        aggregator.start();
        aggregator.on_sample(&sample(70, &[800])).unwrap();
        aggregator.stop().unwrap();

        assert_eq!(
            aggregator.on_sample(&sample(70, &[800])),
            Err(SessionError::Closed)
        );
        assert_eq!(aggregator.stop(), Err(SessionError::Closed));
        assert!(!aggregator.is_active());
    }

    #[test]
    fn test_hrv_computed_over_full_buffer() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        aggregator.start();
        aggregator.on_sample(&sample(74, &[800, 810])).unwrap();
        aggregator.on_sample(&sample(75, &[790])).unwrap();
        aggregator.on_sample(&sample(71, &[850, 800])).unwrap();

        assert_eq!(aggregator.rr_snapshot(), vec![800, 810, 790, 850, 800]);
        let live = aggregator.current_metrics();

        let aggregate = aggregator.stop().unwrap();
        assert_eq!(aggregate.hrv, live);
        assert!((aggregate.hrv.pnn50_pct - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_restart_clears_previous_session() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let first = aggregator.start();
        aggregator.on_sample(&sample(90, &[700])).unwrap();
        aggregator.stop().unwrap();

        let second = aggregator.start();
        assert_ne!(first, second);
        assert!(aggregator.rr_snapshot().is_empty());
    }

    #[test]
    fn test_pause_excludes_time_from_zones_and_calories() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);

        aggregator.on_sample_at(&sample(140, &[]), t0).unwrap();
        aggregator.pause_at(t0 + Duration::minutes(10)).unwrap();
        assert!(aggregator.is_paused());
        assert_eq!(
            aggregator.on_sample_at(&sample(180, &[400]), t0 + Duration::minutes(12)),
            Err(SessionError::Paused)
        );
        aggregator.resume_at(t0 + Duration::minutes(40)).unwrap();
        assert!(aggregator.is_active());

        let aggregate = aggregator.stop_at(t0 + Duration::minutes(60)).unwrap();
        assert_eq!(aggregate.paused_ms, 30 * 60_000);
        assert_eq!(aggregate.zone_times_ms, [0, 0, 30 * 60_000, 0, 0]);
        assert_eq!(aggregate.duration_minutes(), 30);
        assert_eq!(aggregate.duration_secs(), 3600);
        assert_eq!(aggregate.sample_count, 1);
        assert_eq!(aggregate.hrv.sample_count, 0);
        assert_eq!(aggregate.calories_estimate, 417);
    }

    #[test]
    fn test_stop_while_paused() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);
        aggregator.on_sample_at(&sample(70, &[]), t0).unwrap();
        aggregator.pause_at(t0 + Duration::seconds(5)).unwrap();
        // A second pause does not restart the pause clock.
        aggregator.pause_at(t0 + Duration::seconds(8)).unwrap();

        let aggregate = aggregator.stop_at(t0 + Duration::seconds(20)).unwrap();
        assert_eq!(aggregate.zone_times_ms, [5000, 0, 0, 0, 0]);
        assert_eq!(aggregate.paused_ms, 15_000);
        assert_eq!(aggregate.active_ms(), 5000);
    }

    #[test]
    fn test_pause_and_resume_outside_a_session() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        assert_eq!(aggregator.pause(), Err(SessionError::NotStarted));
        assert_eq!(aggregator.resume(), Err(SessionError::NotStarted));

        aggregator.start();
        assert_eq!(aggregator.resume(), Ok(()));
        aggregator.stop().unwrap();
        assert_eq!(aggregator.pause(), Err(SessionError::Closed));
    }

    #[test]
    fn test_short_session_minutes_round_to_nearest() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);
        aggregator.on_sample_at(&sample(140, &[]), t0).unwrap();

        let aggregate = aggregator.stop_at(t0 + Duration::seconds(45)).unwrap();
        assert_eq!(aggregate.duration_minutes(), 1);
        assert!(aggregate.calories_estimate > 0);
    }

    #[test]
    fn test_calories_use_duration_and_profile() {
        let aggregator = SessionAggregator::new(ZoneConfig::default(), BodyProfile::default());
        let t0 = Utc::now();
        aggregator.start_at(t0);
        aggregator.on_sample_at(&sample(140, &[]), t0).unwrap();

        let aggregate = aggregator.stop_at(t0 + Duration::minutes(30)).unwrap();
        assert_eq!(aggregate.duration_minutes(), 30);
        assert_eq!(aggregate.calories_estimate, 417);
    }
}
