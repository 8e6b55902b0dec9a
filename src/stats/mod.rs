//! Link statistics for the Heart Link agent.
//!
//! Counters are updated by the link actor and read by the front end. Only
//! counts are kept here, never sample values.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, LinkStats, LinkStatsSnapshot,
    SharedLinkStats,
};
