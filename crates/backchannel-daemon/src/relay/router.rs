//! Inbound message routing.
//!
//! ```text
//! message → access guard → classify → { session state | terminal bridge | invoker }
//!         → output processor → responder
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use backchannel_core::config::RelayBackend;
use backchannel_core::{
    Access, AccessPolicy, Command, Config, Inbound, Presentation, SessionArg, SessionMode,
    classify,
};

use crate::session::{SessionDirectory, SessionState, looks_like_session_id};
use crate::subprocess::{InvocationRequest, ProcessInvoker};
use crate::terminal::{PollStatus, TerminalBridge};
use crate::transport::{ChatTransport, InboundMessage};

use super::listing::{LISTING_LIMIT, describe_mode, render_listing};
use super::responder::Responder;
use super::types::RelayError;

const STILL_RUNNING: &str = "⏳ (still producing output; send `!status` or ask again later)";
const INTERRUPTED: &str = "⏹️ (interrupted)";

/// Everything a [`Router`] is built from.
pub struct RouterParts {
    pub access: AccessPolicy,
    pub state: Arc<SessionState>,
    pub directory: SessionDirectory,
    pub invoker: ProcessInvoker,
    pub bridge: Option<Arc<TerminalBridge>>,
    pub responder: Responder,
    pub backend: RelayBackend,
    pub working_dir: PathBuf,
}

/// The relay engine. One per bot; tests build as many as they need.
pub struct Router {
    access: AccessPolicy,
    state: Arc<SessionState>,
    directory: SessionDirectory,
    invoker: ProcessInvoker,
    bridge: Option<Arc<TerminalBridge>>,
    responder: Responder,
    backend: RelayBackend,
    working_dir: PathBuf,
}

impl Router {
    pub fn new(parts: RouterParts) -> Self {
        Self {
            access: parts.access,
            state: parts.state,
            directory: parts.directory,
            invoker: parts.invoker,
            bridge: parts.bridge,
            responder: parts.responder,
            backend: parts.backend,
            working_dir: parts.working_dir,
        }
    }

    /// Production wiring from validated configuration.
    pub fn from_config(config: &Config, transport: Arc<dyn ChatTransport>) -> Self {
        let working_dir = config.assistant.working_dir.clone();
        Self::new(RouterParts {
            access: AccessPolicy::new(
                config.transport.allowed_user.clone(),
                config.transport.allowed_channel.clone(),
            ),
            state: Arc::new(SessionState::new(config.assistant.session_mode.clone())),
            directory: SessionDirectory::new(working_dir.clone()),
            invoker: ProcessInvoker::from_config(&config.assistant),
            bridge: config
                .terminal
                .as_ref()
                .map(|t| Arc::new(TerminalBridge::system(t))),
            responder: Responder::new(transport, config.transport.message_limit),
            backend: config.relay_backend,
            working_dir,
        })
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Handle `msg` on its own task so the gateway loop never waits on it.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.handle(msg).await })
    }

    /// Handle one inbound message to completion.
    ///
    /// Denied senders get no response at all.
    #[instrument(skip_all, fields(channel_id = %msg.channel_id, author_id = %msg.author_id))]
    pub async fn handle(&self, msg: InboundMessage) {
        if let Access::Deny(reason) = self.access.check(&msg.sender()) {
            debug!(?reason, "Ignoring message");
            return;
        }
        if msg.content.trim().is_empty() {
            return;
        }

        let channel = msg.channel_id.as_str();
        let result = match classify(&msg.content) {
            Ok(Inbound::Prompt(prompt)) => self.relay_prompt(channel, prompt).await,
            Ok(Inbound::Command(command)) => self.run_command(channel, command).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            self.report(channel, &e).await;
        }
    }

    async fn report(&self, channel: &str, err: &RelayError) {
        match err {
            RelayError::Transport(e) => {
                error!(error = %e, "Could not deliver response");
                return;
            }
            RelayError::Task(e) => error!(error = %e, "Unexpected error handling message"),
            RelayError::CommandParse(_) | RelayError::Busy(_) | RelayError::InvalidSession(_) => {
                debug!(error = %err, "Rejected message");
            }
            _ => warn!(error = %err, "Relay operation failed"),
        }
        if let Err(e) = self
            .responder
            .reply(channel, &err.user_message(), Presentation::Prose)
            .await
        {
            error!(error = %e, "Could not deliver error report");
        }
    }

    async fn relay_prompt(&self, channel: &str, prompt: String) -> Result<(), RelayError> {
        let _guard = self.state.try_acquire()?;
        match self.backend {
            RelayBackend::Print => self.relay_print(channel, prompt).await,
            RelayBackend::Terminal => self.relay_terminal(channel, &prompt).await,
        }
    }

    async fn relay_print(&self, channel: &str, prompt: String) -> Result<(), RelayError> {
        let request = InvocationRequest {
            prompt,
            mode: self.state.mode(),
            working_directory: self.working_dir.clone(),
        };
        let invoker = self.invoker.clone();
        let task = tokio::spawn(async move { invoker.invoke(&request).await });
        let result = self.responder.with_typing(channel, task).await??;

        if !result.is_success() {
            let detail = result.stderr_tail();
            return Err(match result.exit_code {
                Some(code) => RelayError::InvocationFailed {
                    exit_code: Some(code),
                    detail,
                },
                None => RelayError::InvocationKilled { detail },
            });
        }

        let stdout = result.stdout.trim_end();
        let stderr = result.stderr.trim_end();
        if !stderr.is_empty() {
            warn!(stderr, "claude wrote to stderr");
        }
        info!(
            duration_ms = result.duration.as_millis(),
            stdout_chars = stdout.chars().count(),
            "Relayed prompt"
        );

        let body = if stdout.is_empty() { stderr } else { stdout };
        if body.is_empty() {
            self.reply(channel, "✅ Done (no output).").await
        } else {
            self.reply(channel, body).await
        }
    }

    async fn relay_terminal(&self, channel: &str, prompt: &str) -> Result<(), RelayError> {
        let relay = self.configured_bridge()?.begin_relay();
        let bridge = self.live_bridge().await?;
        let baseline = bridge.baseline().await?;
        if relay.is_cancelled() {
            info!("Interrupted before the prompt was sent");
            return self.reply(channel, INTERRUPTED).await;
        }
        bridge.send_keys(prompt).await?;

        let outcome = self
            .responder
            .with_typing(channel, relay.poll_until_stable(&baseline))
            .await?;
        info!(status = ?outcome.status, chars = outcome.text.len(), "Pane poll finished");

        if outcome.text.trim().is_empty() {
            self.reply(channel, "(no new output)").await?;
        } else {
            self.responder
                .reply(channel, &outcome.text, Presentation::Terminal)
                .await?;
        }
        match outcome.status {
            PollStatus::Complete => Ok(()),
            PollStatus::Partial => self.reply(channel, STILL_RUNNING).await,
            PollStatus::Interrupted => self.reply(channel, INTERRUPTED).await,
        }
    }

    async fn run_command(&self, channel: &str, command: Command) -> Result<(), RelayError> {
        match command {
            Command::Status => self.status(channel).await,
            Command::Interrupt => {
                let bridge = self.live_bridge().await?;
                bridge.interrupt().await?;
                self.reply(channel, &format!("⏹️ Sent interrupt to `{}`", bridge.target()))
                    .await
            }
            Command::Raw(args) => self.raw(channel, &args).await,
            Command::Session(None) => {
                let directory = self.directory.clone();
                let sessions =
                    tokio::task::spawn_blocking(move || directory.list_recent(LISTING_LIMIT))
                        .await?;
                self.reply(channel, &render_listing(&self.state.mode(), &sessions))
                    .await
            }
            Command::Session(Some(arg)) => {
                let (mode, note) = self.resolve_session(arg).await?;
                self.state.set_mode(mode.clone());
                let mut text = describe_mode(&mode);
                if let Some(note) = note {
                    text.push('\n');
                    text.push_str(note);
                }
                self.reply(channel, &text).await
            }
        }
    }

    async fn status(&self, channel: &str) -> Result<(), RelayError> {
        let bridge = self.configured_bridge()?;
        let status = bridge.status().await?;
        let session = if !status.exists {
            format!("❌ tmux session `{}` not found", bridge.session_name())
        } else if status.attached {
            format!("✅ tmux session `{}` is running (attached)", bridge.session_name())
        } else {
            format!("✅ tmux session `{}` is running (detached)", bridge.session_name())
        };
        let relay = if self.state.is_busy() { "busy" } else { "idle" };
        self.reply(
            channel,
            &format!("{session}\nRelay: {relay}, mode `{}`", self.state.mode()),
        )
        .await
    }

    async fn raw(&self, channel: &str, args: &str) -> Result<(), RelayError> {
        let bridge = self.configured_bridge()?;
        let _guard = self.state.try_acquire()?;
        let out = bridge.raw(args).await?;

        let combined = [out.stdout.trim_end(), out.stderr.trim_end()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !out.success {
            self.reply(channel, "❌ tmux reported an error:").await?;
        }
        if combined.trim().is_empty() {
            if out.success {
                self.reply(channel, "✅ Done (no output).").await?;
            }
            return Ok(());
        }
        self.responder
            .reply(channel, &combined, Presentation::Terminal)
            .await?;
        Ok(())
    }

    /// Map a `!session` argument to a mode, with an optional note.
    async fn resolve_session(
        &self,
        arg: SessionArg,
    ) -> Result<(SessionMode, Option<&'static str>), RelayError> {
        match arg {
            SessionArg::Continue => Ok((SessionMode::Continue, None)),
            SessionArg::Fresh => Ok((SessionMode::Fresh, None)),
            SessionArg::Index(n) => {
                let directory = self.directory.clone();
                let sessions =
                    tokio::task::spawn_blocking(move || directory.list_recent(n)).await?;
                n.checked_sub(1)
                    .and_then(|i| sessions.into_iter().nth(i))
                    .map(|record| (SessionMode::Resume(record.id), None))
                    .ok_or_else(|| {
                        RelayError::InvalidSession(format!(
                            "No session #{n}. Send `!session` to list recent sessions."
                        ))
                    })
            }
            SessionArg::Id(id) => {
                if !looks_like_session_id(&id) {
                    return Err(RelayError::InvalidSession(format!(
                        "`{id}` is not a session id. Use a number from `!session` or a full session UUID."
                    )));
                }
                let directory = self.directory.clone();
                let lookup = id.clone();
                let known = tokio::task::spawn_blocking(move || directory.find(&lookup))
                    .await?
                    .is_some();
                let note = (!known).then_some(
                    "Not found in the recent listing; Claude will validate it on the next prompt.",
                );
                Ok((SessionMode::Resume(id), note))
            }
        }
    }

    fn configured_bridge(&self) -> Result<&Arc<TerminalBridge>, RelayError> {
        self.bridge.as_ref().ok_or_else(|| {
            RelayError::BridgeUnavailable("no TERMINAL_SESSION_NAME configured".to_string())
        })
    }

    /// The bridge, provided its session currently exists.
    async fn live_bridge(&self) -> Result<&Arc<TerminalBridge>, RelayError> {
        let bridge = self.configured_bridge()?;
        if bridge.status().await?.exists {
            Ok(bridge)
        } else {
            Err(RelayError::BridgeUnavailable(format!(
                "tmux session `{}` not found",
                bridge.session_name()
            )))
        }
    }

    async fn reply(&self, channel: &str, text: &str) -> Result<(), RelayError> {
        self.responder
            .reply(channel, text, Presentation::Prose)
            .await
            .map_err(RelayError::from)
    }
}
