//! Session continuity: current continuation mode, the relay lock, and the
//! read-only view of the assistant's own session store.

mod directory;
mod state;
mod types;

pub use directory::{SessionDirectory, looks_like_session_id};
pub use state::{RelayGuard, SessionState};
pub use types::{BusyError, SessionRecord};
