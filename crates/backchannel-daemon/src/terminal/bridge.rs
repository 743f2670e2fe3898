use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use backchannel_core::config::{PollConfig, TerminalConfig};

use super::exec::{SystemTmux, TmuxExec};
use super::poll::{PaneSource, PollOutcome, poll_until_stable, settle};
use super::types::{PaneSnapshot, SessionStatus, TerminalError, TmuxOutput};

/// Control surface for one `<session>:<pane>` target.
pub struct TerminalBridge {
    exec: Arc<dyn TmuxExec>,
    session: String,
    target: String,
    capture_lines: u32,
    poll: PollConfig,
    /// Cancels the in-progress poll, if any.
    active_poll: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for TerminalBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalBridge")
            .field("target", &self.target)
            .field("capture_lines", &self.capture_lines)
            .finish_non_exhaustive()
    }
}

impl TerminalBridge {
    pub fn new(exec: Arc<dyn TmuxExec>, config: &TerminalConfig) -> Self {
        Self {
            exec,
            session: config.session_name.clone(),
            target: config.target(),
            capture_lines: config.capture_lines,
            poll: config.poll,
            active_poll: Mutex::new(None),
        }
    }

    /// Bridge driving the system `tmux` binary.
    pub fn system(config: &TerminalConfig) -> Self {
        Self::new(Arc::new(SystemTmux::new(config.tmux_bin.clone())), config)
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the configured session exists and has a client attached.
    ///
    /// A failing `list-sessions` (no server running) means no session.
    pub async fn status(&self) -> Result<SessionStatus, TerminalError> {
        let out = self
            .exec
            .run(&args(&[
                "list-sessions",
                "-F",
                "#{session_name}:#{session_attached}",
            ]))
            .await?;
        if !out.success {
            debug!(stderr = %out.stderr.trim(), "tmux list-sessions failed");
            return Ok(SessionStatus {
                exists: false,
                attached: false,
            });
        }

        let found = out.stdout.lines().find_map(|line| {
            let (name, attached) = line.rsplit_once(':')?;
            (name == self.session).then(|| attached.trim() != "0")
        });
        Ok(SessionStatus {
            exists: found.is_some(),
            attached: found.unwrap_or(false),
        })
    }

    /// Type `text` literally into the pane, then press Enter.
    pub async fn send_keys(&self, text: &str) -> Result<(), TerminalError> {
        self.run_checked(&args(&["send-keys", "-t", &self.target, "-l", "--", text]))
            .await?;
        self.run_checked(&args(&["send-keys", "-t", &self.target, "Enter"]))
            .await?;
        debug!(target = %self.target, chars = text.chars().count(), "Sent keys to pane");
        Ok(())
    }

    /// Last `max_lines` of scrollback, escape sequences included.
    pub async fn capture_pane(&self, max_lines: u32) -> Result<PaneSnapshot, TerminalError> {
        let start = format!("-{max_lines}");
        let out = self
            .run_checked(&args(&[
                "capture-pane",
                "-p",
                "-e",
                "-t",
                &self.target,
                "-S",
                &start,
            ]))
            .await?;
        Ok(PaneSnapshot {
            text: out.stdout,
            captured_at: Instant::now(),
        })
    }

    /// Send Ctrl-C to the pane and cancel any poll in progress.
    pub async fn interrupt(&self) -> Result<(), TerminalError> {
        if let Some(token) = self.lock_active().take() {
            token.cancel();
            info!("Cancelled in-progress poll");
        }
        self.run_checked(&args(&["send-keys", "-t", &self.target, "C-c"]))
            .await?;
        info!(target = %self.target, "Sent interrupt to pane");
        Ok(())
    }

    /// Run an arbitrary tmux subcommand. Unsafe by nature: anything tmux can
    /// do, the operator can do.
    pub async fn raw(&self, command: &str) -> Result<TmuxOutput, TerminalError> {
        let argv = shell_words::split(command).map_err(|e| TerminalError::InvalidArgs(e.to_string()))?;
        if argv.is_empty() {
            return Err(TerminalError::InvalidArgs("empty command".to_string()));
        }
        warn!(?argv, "Raw tmux passthrough");
        self.exec.run(&argv).await
    }

    /// Normalized capture used as the diff baseline before sending input.
    pub async fn baseline(&self) -> Result<String, TerminalError> {
        let snapshot = self.capture_pane(self.capture_lines).await?;
        Ok(settle(&snapshot.text))
    }

    /// Register the relay about to drive the pane.
    ///
    /// From now until the returned guard drops, [`interrupt`](Self::interrupt)
    /// cancels it, including before its poll has started.
    pub fn begin_relay(&self) -> ActiveRelay<'_> {
        let token = CancellationToken::new();
        *self.lock_active() = Some(token.clone());
        ActiveRelay {
            bridge: self,
            token,
        }
    }

    /// Poll with the configured timings until the pane settles, the ceiling
    /// elapses, or [`interrupt`](Self::interrupt) is called.
    pub async fn poll_until_stable(&self, baseline: &str) -> Result<PollOutcome, TerminalError> {
        self.begin_relay().poll_until_stable(baseline).await
    }

    async fn run_checked(&self, argv: &[String]) -> Result<TmuxOutput, TerminalError> {
        let out = self.exec.run(argv).await?;
        if out.success {
            Ok(out)
        } else {
            Err(TerminalError::CommandFailed {
                command: argv.first().cloned().unwrap_or_default(),
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active_poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered relay on a [`TerminalBridge`]. Deregisters on drop.
pub struct ActiveRelay<'a> {
    bridge: &'a TerminalBridge,
    token: CancellationToken,
}

impl ActiveRelay<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Poll the bridge's pane until it settles or this relay is interrupted.
    pub async fn poll_until_stable(&self, baseline: &str) -> Result<PollOutcome, TerminalError> {
        poll_until_stable(self.bridge, baseline, self.bridge.poll, &self.token).await
    }
}

impl Drop for ActiveRelay<'_> {
    fn drop(&mut self) {
        self.bridge.lock_active().take();
    }
}

#[async_trait]
impl PaneSource for TerminalBridge {
    async fn snapshot(&self) -> Result<PaneSnapshot, TerminalError> {
        self.capture_pane(self.capture_lines).await
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}
