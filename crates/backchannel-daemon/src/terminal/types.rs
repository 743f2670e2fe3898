//! Terminal bridge types.

use tokio::time::Instant;

/// Result of one multiplexer command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TmuxOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Presence of the configured session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub exists: bool,
    /// Only meaningful when `exists` is true.
    pub attached: bool,
}

/// Raw pane capture, including control sequences.
#[derive(Debug, Clone)]
pub struct PaneSnapshot {
    pub text: String,
    pub captured_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("multiplexer executable not found: {bin}")]
    NotInstalled { bin: String },

    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid raw arguments: {0}")]
    InvalidArgs(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
