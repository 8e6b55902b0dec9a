//! Cumulative link counters.
//!
//! Counters survive across runs when a persistence path is configured; the
//! `status` command reads the persisted file directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one agent process.
#[derive(Debug)]
pub struct LinkStats {
    /// Measurement notifications received from the sensor
    frames_received: AtomicU64,
    /// Notifications that decoded into a sample
    frames_decoded: AtomicU64,
    /// Notifications dropped because they failed to decode
    frames_dropped: AtomicU64,
    /// RR intervals delivered
    rr_intervals: AtomicU64,
    /// Automatic reconnect attempts started
    reconnect_attempts: AtomicU64,
    /// Sessions finalized
    sessions_completed: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            rr_intervals: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous link stats: {e}");
        }

        stats
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decoded frame and the RR intervals it carried.
    pub fn record_frame_decoded(&self, rr_intervals: usize) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        self.rr_intervals
            .fetch_add(rr_intervals as u64, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counters.
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            rr_intervals: self.rr_intervals.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Link Statistics:\n\
             - Frames received: {}\n\
             - Frames decoded: {}\n\
             - Frames dropped: {}\n\
             - RR intervals: {}\n\
             - Reconnect attempts: {}\n\
             - Sessions completed: {}\n\
             - Uptime: {} seconds",
            s.frames_received,
            s.frames_decoded,
            s.frames_dropped,
            s.rr_intervals,
            s.reconnect_attempts,
            s.sessions_completed,
            s.uptime_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let s = self.snapshot();
            let persisted = PersistedStats {
                frames_received: s.frames_received,
                frames_decoded: s.frames_decoded,
                frames_dropped: s.frames_dropped,
                rr_intervals: s.rr_intervals,
                reconnect_attempts: s.reconnect_attempts,
                sessions_completed: s.sessions_completed,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.frames_received
                    .store(persisted.frames_received, Ordering::Relaxed);
                self.frames_decoded
                    .store(persisted.frames_decoded, Ordering::Relaxed);
                self.frames_dropped
                    .store(persisted.frames_dropped, Ordering::Relaxed);
                self.rr_intervals
                    .store(persisted.rr_intervals, Ordering::Relaxed);
                self.reconnect_attempts
                    .store(persisted.reconnect_attempts, Ordering::Relaxed);
                self.sessions_completed
                    .store(persisted.sessions_completed, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_decoded.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.rr_intervals.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.sessions_completed.store(0, Ordering::Relaxed);
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatsSnapshot {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub rr_intervals: u64,
    pub reconnect_attempts: u64,
    pub sessions_completed: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    frames_received: u64,
    frames_decoded: u64,
    frames_dropped: u64,
    rr_intervals: u64,
    reconnect_attempts: u64,
    sessions_completed: u64,
    last_updated: DateTime<Utc>,
}

/// Stats shared between the link actor and the front end.
pub type SharedLinkStats = Arc<LinkStats>;

pub fn create_shared_stats() -> SharedLinkStats {
    Arc::new(LinkStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedLinkStats {
    Arc::new(LinkStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counting() {
        let stats = LinkStats::new();

        stats.record_frame_received();
        stats.record_frame_received();
        stats.record_frame_decoded(2);
        stats.record_frame_dropped();

        let s = stats.snapshot();
        assert_eq!(s.frames_received, 2);
        assert_eq!(s.frames_decoded, 1);
        assert_eq!(s.frames_dropped, 1);
        assert_eq!(s.rr_intervals, 2);
    }

    #[test]
    fn test_reset() {
        let stats = LinkStats::new();
        stats.record_reconnect_attempt();
        stats.record_session_completed();
        stats.reset();

        let s = stats.snapshot();
        assert_eq!(s.reconnect_attempts, 0);
        assert_eq!(s.sessions_completed, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("heartlink-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");

        let stats = LinkStats::with_persistence(path.clone());
        stats.record_frame_received();
        stats.record_frame_decoded(3);
        stats.save().unwrap();

        let reloaded = LinkStats::with_persistence(path.clone());
        let s = reloaded.snapshot();
        assert_eq!(s.frames_received, 1);
        assert_eq!(s.rr_intervals, 3);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_summary_format() {
        let summary = LinkStats::new().summary();
        assert!(summary.contains("Frames received"));
        assert!(summary.contains("Reconnect attempts"));
    }
}
