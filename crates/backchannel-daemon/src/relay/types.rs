//! Relay module types.

use backchannel_core::ParseError;

use crate::session::BusyError;
use crate::subprocess::SubprocessError;
use crate::terminal::TerminalError;
use crate::transport::TransportError;

const COMMAND_HELP: &str = "Commands: `!status`, `!interrupt`, `!raw <tmux args>`, \
                            `!session [continue|fresh|<n>|<id>]`";

/// Everything that can go wrong while handling one inbound message.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    CommandParse(#[from] ParseError),

    #[error(transparent)]
    Busy(#[from] BusyError),

    /// The assistant could not be launched or exited nonzero.
    #[error("assistant invocation failed (exit code {exit_code:?}): {detail}")]
    InvocationFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    /// The assistant started but was terminated by a signal.
    #[error("assistant terminated by a signal: {detail}")]
    InvocationKilled { detail: String },

    #[error("terminal bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("terminal error: {0}")]
    Terminal(TerminalError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl From<SubprocessError> for RelayError {
    fn from(e: SubprocessError) -> Self {
        Self::InvocationFailed {
            exit_code: None,
            detail: e.to_string(),
        }
    }
}

impl From<TerminalError> for RelayError {
    fn from(e: TerminalError) -> Self {
        match e {
            TerminalError::NotInstalled { .. } => Self::BridgeUnavailable(e.to_string()),
            other => Self::Terminal(other),
        }
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl RelayError {
    /// Text shown to the operator in chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::CommandParse(e) => format!("❌ {e}\n{COMMAND_HELP}"),
            Self::Busy(_) => {
                "⏳ Still working on the previous request. Try again when it finishes.".to_string()
            }
            Self::InvocationFailed {
                exit_code: Some(code),
                detail,
            } => format!("❌ Claude exited with code {code}:\n{detail}"),
            Self::InvocationFailed {
                exit_code: None,
                detail,
            } => format!("❌ Claude could not be run: {detail}"),
            Self::InvocationKilled { detail } => {
                format!("❌ Claude was terminated before finishing:\n{detail}")
            }
            Self::BridgeUnavailable(reason) => format!("❌ Terminal bridge unavailable: {reason}"),
            Self::InvalidSession(reason) => format!("❌ {reason}"),
            Self::Terminal(e) => format!("❌ Terminal command failed: {e}"),
            Self::Transport(_) | Self::Task(_) => {
                "❌ An unexpected error occurred. Check the daemon logs.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_multiplexer_is_bridge_unavailable() {
        let err = RelayError::from(TerminalError::NotInstalled {
            bin: "tmux".to_string(),
        });
        assert!(matches!(err, RelayError::BridgeUnavailable(_)));
    }

    #[test]
    fn missing_assistant_is_invocation_failure() {
        let err = RelayError::from(SubprocessError::NotInstalled {
            bin: "claude".to_string(),
        });
        assert!(
            err.user_message()
                .contains("assistant executable not found: claude")
        );
    }

    #[test]
    fn parse_errors_include_help() {
        let err = RelayError::from(ParseError::Unknown("foo".to_string()));
        let msg = err.user_message();
        assert!(msg.contains("Unknown command: `!foo`"));
        assert!(msg.contains("!session"));
    }

    #[test]
    fn failure_message_carries_stderr_tail() {
        let err = RelayError::InvocationFailed {
            exit_code: Some(1),
            detail: "no such session".to_string(),
        };
        assert_eq!(err.user_message(), "❌ Claude exited with code 1:\nno such session");
    }

    #[test]
    fn killed_process_is_not_a_launch_failure() {
        let err = RelayError::InvocationKilled {
            detail: "command failed".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("terminated before finishing"));
        assert!(!msg.contains("could not be run"));
    }
}
