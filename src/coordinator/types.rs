//! Engine state and run summaries.
//!
//! # State Transitions
//!
//! ```text
//!              run_live()
//! Created ─────────────────→ Live ──────────┐
//!    │                                      │ shutdown signal
//!    │ run_reindex()                        ↓
//!    └────────────────────→ Reindexing ──→ Stopped
//!                              │
//!              (fatal error, either mode)
//!                              ↓
//!                           Failed
//! ```
//!
//! An engine runs one mode once. Restarting after `Stopped` or `Failed`
//! means building a new engine (and, for the binary, a new process).

use crate::config::{AnonymizerConfig, OverflowPolicy};
use crate::error::Result;
use crate::position::Position;
use std::time::Duration;

/// State of the anonymization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Connected, nothing running yet.
    Created,

    /// Tailing the change stream.
    Live,

    /// Running a full reindex.
    Reindexing,

    /// Finished cleanly (shutdown signal in live mode, snapshot exhausted in
    /// reindex mode).
    Stopped,

    /// A fatal error ended the run.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Live => write!(f, "Live"),
            EngineState::Reindexing => write!(f, "Reindexing"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Live-mode scheduling knobs, resolved from [`AnonymizerConfig`].
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Size threshold and maximum batch size.
    pub batch_size: usize,
    /// Drain timer period.
    pub flush_interval: Duration,
    /// Feed-to-pipeline mailbox bound.
    pub mailbox_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl LiveSettings {
    pub fn from_config(config: &AnonymizerConfig) -> Result<Self> {
        Ok(Self {
            batch_size: config.live.batch_size,
            flush_interval: config.live.flush_interval_duration()?,
            mailbox_capacity: config.queue.mailbox_capacity,
            overflow: config.queue.overflow,
        })
    }
}

/// What a live run did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSummary {
    /// Change events received from the feed.
    pub events: u64,
    /// Non-empty drains.
    pub drains: u64,
    /// Records written to the target.
    pub written: u64,
    /// Last persisted checkpoint.
    pub checkpoint: Option<Position>,
}

/// What a reindex did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexSummary {
    /// Documents read from the source snapshot.
    pub documents: u64,
    /// Non-empty drains.
    pub drains: u64,
    /// Records written to the target.
    pub written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::Live.to_string(), "Live");
        assert_eq!(EngineState::Reindexing.to_string(), "Reindexing");
        assert_eq!(EngineState::Stopped.to_string(), "Stopped");
        assert_eq!(EngineState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_live_settings_from_defaults() {
        let settings = LiveSettings::from_config(&AnonymizerConfig::default()).unwrap();
        assert_eq!(settings.batch_size, 1000);
        assert_eq!(settings.flush_interval, Duration::from_secs(1));
        assert_eq!(settings.mailbox_capacity, 10_000);
        assert_eq!(settings.overflow, OverflowPolicy::Block);
    }

    #[test]
    fn test_live_settings_rejects_bad_interval() {
        let mut config = AnonymizerConfig::default();
        config.live.flush_interval = "whenever".to_string();
        assert!(LiveSettings::from_config(&config).is_err());
    }
}
