//! Bounded retry policy for operator commands.

use std::time::Duration;

/// Number of times a command is published by default
pub const PUBLISH_REPEAT: u32 = 5;

/// How many times, and how fast, a command handler is invoked.
///
/// Publishing the same message several times raises the chance that at
/// least one copy makes it across the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total handler invocations per command (at least one)
    pub attempts: u32,
    /// Pause between invocations
    pub backoff: Duration,
    /// Stop early once a send of this command has been acknowledged
    pub stop_on_ack: bool,
}

impl RetryPolicy {
    /// Immediate retries without early exit
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::ZERO,
            stop_on_ack: false,
        }
    }

    /// Pause between invocations
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop once a send has been acknowledged
    pub fn with_stop_on_ack(mut self, stop_on_ack: bool) -> Self {
        self.stop_on_ack = stop_on_ack;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(PUBLISH_REPEAT)
    }
}
