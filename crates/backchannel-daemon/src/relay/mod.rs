//! Relay engine: routes inbound chat messages to session state, the terminal
//! bridge or the assistant, and delivers the results.

pub mod listing;
pub mod responder;
pub mod router;
pub mod types;

pub use responder::Responder;
pub use router::{Router, RouterParts};
pub use types::RelayError;
