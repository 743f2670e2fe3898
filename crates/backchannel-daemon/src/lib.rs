//! Backchannel Daemon Library
//!
//! Relays chat messages to a local Claude Code process:
//! - Session state, relay lock and the session store listing
//! - One-shot assistant invocation
//! - Optional tmux bridge with stability polling
//! - Routing and ordered, rate-limit aware delivery
//! - Discord transport adapter

pub mod discord;
pub mod relay;
pub mod session;
pub mod subprocess;
pub mod terminal;
pub mod transport;
