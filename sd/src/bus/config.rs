//! Command bus configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Command bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default command timeout in seconds
    #[serde(rename = "command-timeout-secs", default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Channel buffer size for hub requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Channel buffer size for each participant's inbound messages
    #[serde(rename = "participant-channel-buffer", default = "default_participant_channel_buffer")]
    pub participant_channel_buffer: usize,
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_channel_buffer() -> usize {
    1000
}

fn default_participant_channel_buffer() -> usize {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            channel_buffer: default_channel_buffer(),
            participant_channel_buffer: default_participant_channel_buffer(),
        }
    }
}

impl BusConfig {
    /// Default command timeout as a Duration
    pub fn command_timeout(&self) -> Duration {
        debug!(command_timeout_secs = %self.command_timeout_secs, "BusConfig::command_timeout: called");
        Duration::from_secs(self.command_timeout_secs)
    }
}
