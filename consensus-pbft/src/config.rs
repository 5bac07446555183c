//! PBFT consensus configuration.
//!
//! Timing parameters, watermark window and checkpoint cadence for a node.

use std::time::Duration;

/// Configuration for the PBFT engine and its node driver.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbftConfig {
    /// How long a round may sit in a non-idle phase before the node gives up
    /// on the leader and changes view.
    /// Default: 5000.
    pub phase_timeout_ms: u64,

    /// Width of the accepted sequence window above the low watermark.
    /// Default: 200.
    pub watermark_window: u64,

    /// Publish a checkpoint vote every this many commits.
    /// Default: 10.
    pub checkpoint_interval: u64,

    /// Period of the background checkpoint save, independent of commits.
    /// Default: 30000.
    pub checkpoint_period_ms: u64,

    /// Maximum number of faulty validators tolerated. Informational; quorums
    /// are always derived from the live validator-set size.
    /// Default: 1.
    pub f: usize,

    /// Early prepares and commits held back until their round starts.
    /// Default: 256.
    pub max_buffered_messages: usize,

    /// How many views ahead of the current one view-change votes are
    /// collected. Votes for views further out are dropped.
    /// Default: 16.
    pub view_change_lookahead: u64,

    /// Capacity of the node's command and inbound queues.
    /// Default: 1024.
    pub event_buffer_size: usize,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            phase_timeout_ms: 5_000,
            watermark_window: 200,
            checkpoint_interval: 10,
            checkpoint_period_ms: 30_000,
            f: 1,
            max_buffered_messages: 256,
            view_change_lookahead: 16,
            event_buffer_size: 1_024,
        }
    }
}

impl PbftConfig {
    /// Short timeouts for local multi-node tests.
    pub fn dev_default() -> Self {
        Self {
            phase_timeout_ms: 500,
            checkpoint_period_ms: 60_000,
            ..Self::default()
        }
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    pub fn checkpoint_period(&self) -> Duration {
        Duration::from_millis(self.checkpoint_period_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phase_timeout_ms == 0 {
            return Err(ConfigError::InvalidPhaseTimeout);
        }
        if self.watermark_window == 0 {
            return Err(ConfigError::InvalidWatermarkWindow);
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::InvalidCheckpointInterval);
        }
        if self.checkpoint_period_ms == 0 {
            return Err(ConfigError::InvalidCheckpointPeriod);
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::InvalidEventBuffer);
        }
        if self.view_change_lookahead == 0 {
            return Err(ConfigError::InvalidViewChangeLookahead);
        }
        Ok(())
    }
}

/// Errors in PBFT configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("phase_timeout_ms must be > 0")]
    InvalidPhaseTimeout,
    #[error("watermark_window must be > 0")]
    InvalidWatermarkWindow,
    #[error("checkpoint_interval must be > 0")]
    InvalidCheckpointInterval,
    #[error("checkpoint_period_ms must be > 0")]
    InvalidCheckpointPeriod,
    #[error("event_buffer_size must be > 0")]
    InvalidEventBuffer,
    #[error("view_change_lookahead must be > 0")]
    InvalidViewChangeLookahead,
}
