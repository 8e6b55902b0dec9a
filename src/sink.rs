//! Persistence collaborators for finished sessions.
//!
//! The aggregator never decides where data goes; callers inject a
//! [`SessionSink`]. Two implementations ship with the crate: an in-memory
//! sink for tests and embedding, and a JSON directory sink used by the CLI.

use crate::core::{SampleRecord, SessionAggregate};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Receives session data from the aggregator.
pub trait SessionSink: Send + Sync {
    /// Persist a finalized session.
    fn persist_session(&self, session: &SessionAggregate) -> Result<(), SinkError>;

    /// Record one aggregated sample. Sinks that only keep summaries can ignore it.
    fn record_sample(&self, _record: &SampleRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink errors.
#[derive(Debug)]
pub enum SinkError {
    IoError(String),
    SerializeError(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::IoError(e) => write!(f, "IO error: {e}"),
            SinkError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    sessions: Mutex<Vec<SessionAggregate>>,
    samples: Mutex<Vec<SampleRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<SessionAggregate> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn samples(&self) -> Vec<SampleRecord> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SessionSink for MemorySink {
    fn persist_session(&self, session: &SessionAggregate) -> Result<(), SinkError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session.clone());
        Ok(())
    }

    fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Writes `session_<timestamp>_<id>.json` summaries and appends samples as
/// JSON lines to `samples_<id>.jsonl` in one directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the summary for `session` is written to.
    pub fn session_path(&self, session: &SessionAggregate) -> PathBuf {
        self.dir.join(format!(
            "session_{}_{}.json",
            session.start_time.format("%Y%m%d_%H%M%S"),
            session.session_id.simple()
        ))
    }

    fn samples_path(&self, record: &SampleRecord) -> PathBuf {
        self.dir
            .join(format!("samples_{}.jsonl", record.session_id.simple()))
    }

    fn ensure_dir(&self) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SinkError::IoError(e.to_string()))
    }

    /// Load every session summary found in the directory, oldest first.
    pub fn load_sessions(&self) -> Result<Vec<SessionAggregate>, SinkError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SinkError::IoError(e.to_string())),
        };

        let paths = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|e| e == "json").unwrap_or(false)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("session_"))
                        .unwrap_or(false)
            });

        let mut sessions = Vec::new();
        for path in paths {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Skipping unreadable session file {}: {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<SessionAggregate>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!("Skipping malformed session file {}: {e}", path.display())
                }
            }
        }
        sessions.sort_by_key(|s| s.start_time);
        Ok(sessions)
    }
}

impl SessionSink for JsonDirSink {
    fn persist_session(&self, session: &SessionAggregate) -> Result<(), SinkError> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| SinkError::SerializeError(e.to_string()))?;
        std::fs::write(self.session_path(session), json)
            .map_err(|e| SinkError::IoError(e.to_string()))
    }

    fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        self.ensure_dir()?;
        let line =
            serde_json::to_string(record).map_err(|e| SinkError::SerializeError(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.samples_path(record))
            .map_err(|e| SinkError::IoError(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SinkError::IoError(e.to_string()))
    }
}
