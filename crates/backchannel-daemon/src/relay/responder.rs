//! Ordered delivery of relay output to the chat transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use backchannel_core::{Presentation, render};

use crate::transport::{ChatTransport, TransportError};

/// The typing indicator expires after ~10s; refresh a little earlier.
const TYPING_REFRESH: Duration = Duration::from_secs(8);
/// Attempts per chunk when rate limited. With the backoff floor this waits
/// a little over a minute before giving up.
const MAX_SEND_ATTEMPTS: u32 = 8;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub struct Responder {
    transport: Arc<dyn ChatTransport>,
    message_limit: usize,
    max_attempts: u32,
    base_backoff: Duration,
}

impl Responder {
    pub fn new(transport: Arc<dyn ChatTransport>, message_limit: usize) -> Self {
        Self {
            transport,
            message_limit,
            max_attempts: MAX_SEND_ATTEMPTS,
            base_backoff: BASE_BACKOFF,
        }
    }

    /// Override retry timing (tests use millisecond backoff).
    #[must_use]
    pub const fn with_backoff(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_backoff = base_backoff;
        self
    }

    /// Render `text` and deliver every segment in order.
    pub async fn reply(
        &self,
        channel_id: &str,
        text: &str,
        presentation: Presentation,
    ) -> Result<(), TransportError> {
        let chunks = render(text, presentation, self.message_limit);
        self.send_chunks(channel_id, &chunks).await
    }

    /// Send chunks strictly in order. A chunk that cannot be delivered stops
    /// the sequence so the operator never sees output with a hole in it.
    ///
    /// If rate limiting outlasts the retry budget, a notice saying how many
    /// parts were withheld is sent in their place.
    pub async fn send_chunks(
        &self,
        channel_id: &str,
        chunks: &[String],
    ) -> Result<(), TransportError> {
        for (index, chunk) in chunks.iter().enumerate() {
            if let Err(e) = self.send_with_retry(channel_id, chunk).await {
                warn!(
                    channel_id,
                    chunk = index + 1,
                    total = chunks.len(),
                    error = %e,
                    "Dropping remaining chunks after delivery failure"
                );
                if matches!(e, TransportError::RateLimited { .. }) {
                    let notice = format!(
                        "⚠️ Rate limited: {} of {} parts were not delivered.",
                        chunks.len() - index,
                        chunks.len()
                    );
                    if let Err(notice_err) = self.send_with_retry(channel_id, &notice).await {
                        debug!(channel_id, error = %notice_err, "Truncation notice not delivered");
                    }
                }
                return Err(e);
            }
        }
        debug!(channel_id, chunks = chunks.len(), "Delivered response");
        Ok(())
    }

    async fn send_with_retry(&self, channel_id: &str, content: &str) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            match self.transport.send_message(channel_id, content).await {
                Err(TransportError::RateLimited { retry_after }) if attempt + 1 < self.max_attempts => {
                    let backoff = self.base_backoff.saturating_mul(1 << attempt.min(6));
                    let delay = retry_after.max(backoff);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis(), "Rate limited, retrying chunk");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Drive `work` to completion while keeping the typing indicator alive.
    ///
    /// Indicator failures are logged and otherwise ignored.
    pub async fn with_typing<F: Future>(&self, channel_id: &str, work: F) -> F::Output {
        tokio::pin!(work);
        loop {
            if let Err(e) = self.transport.trigger_typing(channel_id).await {
                debug!(channel_id, error = %e, "Typing indicator failed");
            }
            tokio::select! {
                output = &mut work => return output,
                () = sleep(TYPING_REFRESH) => {}
            }
        }
    }
}
