//! `Backchannel` Core Library
//!
//! Shared, transport-agnostic functionality for the relay daemon:
//! - Configuration model and validation
//! - Access guard for inbound chat messages
//! - Command classification (`!status`, `!session`, ...)
//! - Output normalization and chunking
//! - Common error types

pub mod access;
pub mod command;
pub mod config;
pub mod error;
pub mod output;
pub mod session_mode;
pub mod tracing_init;

pub use access::{Access, AccessPolicy, DenyReason, Sender};
pub use command::{Command, Inbound, ParseError, SessionArg, classify};
pub use config::Config;
pub use error::{Error, Result};
pub use output::{Presentation, chunk, normalize, render};
pub use session_mode::SessionMode;
