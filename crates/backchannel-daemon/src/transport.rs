//! Chat transport seam.
//!
//! The relay only needs to post text and show a typing indicator; the
//! Discord adapter in [`crate::discord`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;

use backchannel_core::Sender;

/// A message received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    /// Sent by this bot or by another automated account.
    pub automated: bool,
}

impl InboundMessage {
    pub fn sender(&self) -> Sender<'_> {
        Sender {
            user_id: &self.author_id,
            channel_id: &self.channel_id,
            automated: self.automated,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server asked us to slow down.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("gateway error: {0}")]
    Gateway(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post `content` to `channel_id`. `content` is already within the limit.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), TransportError>;

    /// Show the transient "working" indicator.
    async fn trigger_typing(&self, channel_id: &str) -> Result<(), TransportError>;
}
