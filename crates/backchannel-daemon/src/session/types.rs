//! Session types.

use std::time::SystemTime;

/// Snapshot of one recorded assistant session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    /// Last modification of the session log.
    pub timestamp: SystemTime,
    /// First user prompt, truncated for display.
    pub first_prompt: String,
}

/// A blocking operation is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Relay is busy with another request")]
pub struct BusyError;
