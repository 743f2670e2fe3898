//! Discord gateway listener.
//!
//! Keeps one websocket session alive (hello, identify, heartbeat) and
//! forwards every `MESSAGE_CREATE` to the dispatch channel. On disconnect it
//! reconnects with exponential backoff.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::InboundMessage;

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
pub const INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// A connection that stayed up this long resets the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Reconnecting will not help (bad token, disallowed intents).
    #[error("gateway rejected the bot: {0}")]
    Fatal(String),

    #[error("gateway connection lost: {0}")]
    Disconnected(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Disconnected(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Disconnected(format!("malformed payload: {e}"))
    }
}

/// Exponential reconnect delays.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1 << attempt.min(16))
            .min(self.max_delay)
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    channel_id: String,
    #[serde(default)]
    content: String,
    author: Author,
    #[serde(default)]
    webhook_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: Author,
}

pub struct Gateway {
    token: String,
    url: String,
    reconnect: ReconnectPolicy,
}

impl Gateway {
    pub fn new(token: String) -> Self {
        Self {
            token,
            url: GATEWAY_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Listen until `shutdown` fires, the receiver goes away, or the
    /// gateway rejects the bot outright.
    pub async fn run(
        &self,
        messages: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), GatewayError> {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            match self.connect_and_run(&messages, &shutdown).await {
                Ok(()) => {
                    info!("Gateway listener stopped");
                    return Ok(());
                }
                Err(GatewayError::Fatal(reason)) => {
                    error!(reason = %reason, "Gateway rejected the bot; not reconnecting");
                    return Err(GatewayError::Fatal(reason));
                }
                Err(e) => {
                    if started.elapsed() > STABLE_CONNECTION {
                        attempt = 0;
                    }
                    let delay = self.reconnect.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Reconnecting to gateway");

                    tokio::select! {
                        () = sleep(delay) => {}
                        () = shutdown.cancelled() => {
                            info!("Gateway listener shutting down during reconnect wait");
                            return Ok(());
                        }
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        messages: &mpsc::Sender<InboundMessage>,
        shutdown: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let hello = match stream.next().await {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<Payload>(text.as_str())?,
            other => {
                return Err(GatewayError::Disconnected(format!(
                    "expected hello, got {other:?}"
                )));
            }
        };
        if hello.op != OP_HELLO {
            return Err(GatewayError::Disconnected(format!(
                "expected hello, got op {}",
                hello.op
            )));
        }
        let interval_ms = hello.d["heartbeat_interval"]
            .as_u64()
            .ok_or_else(|| GatewayError::Disconnected("hello without heartbeat_interval".into()))?;

        sink.send(Message::Text(identify_payload(&self.token).to_string().into()))
            .await?;
        info!(heartbeat_ms = interval_ms, "Identified with gateway");

        let mut heartbeat = interval(Duration::from_millis(interval_ms));
        heartbeat.tick().await; // Skip first immediate tick

        let mut sequence: Option<u64> = None;
        let mut self_id: Option<String> = None;
        let mut acked = true;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    if !acked {
                        return Err(GatewayError::Disconnected("heartbeat not acknowledged".into()));
                    }
                    acked = false;
                    sink.send(Message::Text(heartbeat_payload(sequence).to_string().into())).await?;
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(close))) => {
                            let code = close.as_ref().map(|c| u16::from(c.code));
                            let reason = close.map(|c| c.reason.to_string()).unwrap_or_default();
                            return Err(close_error(code, &reason));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(GatewayError::Disconnected("stream ended".into())),
                    };

                    let payload: Payload = serde_json::from_str(text.as_str())?;
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match payload.op {
                        OP_DISPATCH => {
                            let event = payload.t.as_deref().unwrap_or_default();
                            if event == "READY" {
                                let ready: Ready = serde_json::from_value(payload.d)?;
                                info!(bot_id = %ready.user.id, "Gateway ready");
                                self_id = Some(ready.user.id);
                            } else if event == "MESSAGE_CREATE" {
                                let created: MessageCreate = serde_json::from_value(payload.d)?;
                                let inbound = to_inbound(created, self_id.as_deref());
                                if messages.send(inbound).await.is_err() {
                                    debug!("Dispatch channel closed");
                                    return Ok(());
                                }
                            }
                        }
                        OP_HEARTBEAT => {
                            sink.send(Message::Text(heartbeat_payload(sequence).to_string().into())).await?;
                        }
                        OP_HEARTBEAT_ACK => acked = true,
                        OP_RECONNECT => {
                            return Err(GatewayError::Disconnected("server requested reconnect".into()));
                        }
                        OP_INVALID_SESSION => {
                            return Err(GatewayError::Disconnected("session invalidated".into()));
                        }
                        other => debug!(op = other, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "backchannel",
                "device": "backchannel",
            },
        },
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

fn to_inbound(created: MessageCreate, self_id: Option<&str>) -> InboundMessage {
    let automated = created.author.bot
        || created.webhook_id.is_some()
        || self_id == Some(created.author.id.as_str());
    InboundMessage {
        channel_id: created.channel_id,
        author_id: created.author.id,
        content: created.content,
        automated,
    }
}

fn close_error(code: Option<u16>, reason: &str) -> GatewayError {
    match code {
        Some(code) if FATAL_CLOSE_CODES.contains(&code) => {
            GatewayError::Fatal(format!("close code {code}: {reason}"))
        }
        Some(code) => GatewayError::Disconnected(format!("close code {code}: {reason}")),
        None => GatewayError::Disconnected("closed without code".to_string()),
    }
}
