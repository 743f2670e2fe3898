//! Optional bridge to a tmux session running the assistant interactively.
//!
//! Provides status, key injection, pane capture, interrupt and raw command
//! passthrough, plus the stability polling loop used by the terminal relay
//! backend.

pub mod bridge;
pub mod exec;
pub mod poll;
pub mod types;

pub use bridge::{ActiveRelay, TerminalBridge};
pub use exec::{SystemTmux, TmuxExec};
pub use poll::{PaneSource, PollOutcome, PollStatus, delta, poll_until_stable};
pub use types::{PaneSnapshot, SessionStatus, TerminalError, TmuxOutput};
