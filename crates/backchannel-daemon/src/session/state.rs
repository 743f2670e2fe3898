//! Session state: continuation mode and the single relay lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use backchannel_core::SessionMode;

use super::types::BusyError;

/// In-memory engine state. Resets to defaults on restart.
///
/// One value per engine instance; tests build as many as they like.
#[derive(Debug, Default)]
pub struct SessionState {
    mode: Mutex<SessionMode>,
    busy: AtomicBool,
}

impl SessionState {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            busy: AtomicBool::new(false),
        }
    }

    /// Current mode. Callers snapshot it into an invocation request, so a
    /// later [`set_mode`](Self::set_mode) never affects a request in flight.
    pub fn mode(&self) -> SessionMode {
        self.mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_mode(&self, mode: SessionMode) {
        let mut current = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        info!(from = %current, to = %mode, "Session mode changed");
        *current = mode;
    }

    /// Take the relay lock without waiting.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn try_acquire(self: &Arc<Self>) -> Result<RelayGuard, BusyError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BusyError)?;
        debug!("Relay lock acquired");
        Ok(RelayGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
        debug!("Relay lock released");
    }
}

/// Holds the relay lock for the duration of one blocking operation.
#[derive(Debug)]
pub struct RelayGuard {
    state: Arc<SessionState>,
}

impl RelayGuard {
    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.state.release();
    }
}
