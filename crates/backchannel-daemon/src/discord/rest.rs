//! Discord REST client for outbound messages.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport::{ChatTransport, TransportError};

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Used when a 429 carries no usable delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    allowed_mentions: AllowedMentions,
}

/// Relayed output must never ping anyone.
#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 0],
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Bot-authenticated client for the channel endpoints the relay uses.
pub struct DiscordRest {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl std::fmt::Debug for DiscordRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordRest")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl DiscordRest {
    /// Requires a rustls crypto provider to be installed.
    pub fn new(token: String) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/backchannel/backchannel, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            http,
            token,
            api_base: API_BASE.to_string(),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn channel_url(&self, channel_id: &str, endpoint: &str) -> String {
        format!("{}/channels/{channel_id}/{endpoint}", self.api_base)
    }

    async fn post<B: Serialize + Sync>(&self, url: &str, body: Option<&B>) -> Result<(), TransportError> {
        let mut request = self
            .http
            .post(url)
            .header("Authorization", format!("Bot {}", self.token));
        request = match body {
            Some(body) => request.json(body),
            None => request.header("Content-Length", "0"),
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(&body, header.as_deref());
            debug!(retry_after_ms = retry_after.as_millis(), "Discord rate limit");
            return Err(TransportError::RateLimited { retry_after });
        }

        warn!(status = status.as_u16(), body = %body, "Discord API returned error");
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatTransport for DiscordRest {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), TransportError> {
        let body = CreateMessage {
            content,
            allowed_mentions: AllowedMentions { parse: [] },
        };
        self.post(&self.channel_url(channel_id, "messages"), Some(&body))
            .await
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<(), TransportError> {
        self.post::<()>(&self.channel_url(channel_id, "typing"), None)
            .await
    }
}

/// Delay from a 429 response: JSON `retry_after` (seconds, fractional),
/// then the `Retry-After` header, then a default.
fn parse_retry_after(body: &str, header: Option<&str>) -> Duration {
    serde_json::from_str::<RateLimitBody>(body)
        .ok()
        .map(|b| b.retry_after)
        .or_else(|| header.and_then(|h| h.trim().parse::<f64>().ok()))
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs_f64)
}
