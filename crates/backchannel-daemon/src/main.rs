//! `Backchannel` Daemon
//!
//! Listens on a Discord channel and relays the operator's messages to a
//! local Claude Code process, optionally controlling a tmux session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use backchannel_core::config::Settings;
use backchannel_core::tracing_init::{default_filter, init_tracing};
use backchannel_daemon::discord::{DiscordRest, Gateway};
use backchannel_daemon::relay::Router;
use backchannel_daemon::transport::InboundMessage;

/// Inbound messages buffered between the gateway and the dispatcher.
const DISPATCH_BUFFER: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "backchannel")]
#[command(version, about = "Backchannel - relay chat messages to a local Claude Code process")]
struct Args {
    /// Discord bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Only accept messages from this channel id
    #[arg(long, env = "ALLOWED_CHANNEL")]
    allowed_channel: Option<String>,

    /// Only accept messages from this user id
    #[arg(long, env = "ALLOWED_USER")]
    allowed_user: Option<String>,

    /// Initial session mode: continue, fresh or resume:<id>
    #[arg(long, env = "SESSION_MODE")]
    session_mode: Option<String>,

    /// tmux session to bridge (enables !status, !interrupt, !raw)
    #[arg(long = "terminal-session", env = "TERMINAL_SESSION_NAME")]
    terminal_session_name: Option<String>,

    /// tmux pane within the session
    #[arg(long, env = "TERMINAL_PANE")]
    terminal_pane: Option<String>,

    /// Where prompts go: print (one-shot subprocess) or terminal (tmux pane)
    #[arg(long, env = "RELAY_BACKEND")]
    relay_backend: Option<String>,

    /// Working directory for Claude Code (defaults to the current directory)
    #[arg(long, env = "WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Path to the `claude` CLI binary
    #[arg(long, env = "CLAUDE_BIN")]
    claude_bin: Option<PathBuf>,

    /// Path to the `tmux` binary
    #[arg(long, env = "TMUX_BIN")]
    tmux_bin: Option<PathBuf>,

    /// Permission strategy for one-shot invocations.
    #[arg(
        long,
        default_value = "skip-permissions",
        env = "PERMISSION_STRATEGY",
        value_parser = ["skip-permissions", "default"]
    )]
    permission_strategy: String,

    /// Capture ceiling per output stream, in bytes
    #[arg(long, env = "MAX_OUTPUT_BYTES")]
    max_output_bytes: Option<usize>,

    /// Maximum characters per chat message
    #[arg(long, env = "MESSAGE_LIMIT")]
    message_limit: Option<usize>,

    /// Pane scrollback lines captured by the terminal bridge
    #[arg(long, env = "CAPTURE_LINES")]
    capture_lines: Option<u32>,

    /// Pane polling interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Unchanged-output period that ends a poll, in milliseconds
    #[arg(long, env = "POLL_QUIET_MS")]
    poll_quiet_ms: Option<u64>,

    /// Longest a single poll may run, in seconds
    #[arg(long, env = "POLL_CEILING_SECS")]
    poll_ceiling_secs: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            bot_token: self.bot_token.clone(),
            allowed_channel: self.allowed_channel.clone(),
            allowed_user: self.allowed_user.clone(),
            session_mode: self.session_mode.clone(),
            terminal_session_name: self.terminal_session_name.clone(),
            terminal_pane: self.terminal_pane.clone(),
            relay_backend: self.relay_backend.clone(),
            working_dir: self.working_dir.clone(),
            claude_bin: self.claude_bin.clone(),
            tmux_bin: self.tmux_bin.clone(),
            skip_permissions: Some(self.permission_strategy == "skip-permissions"),
            max_output_bytes: self.max_output_bytes,
            message_limit: self.message_limit,
            capture_lines: self.capture_lines,
            poll_interval_ms: self.poll_interval_ms,
            poll_quiet_ms: self.poll_quiet_ms,
            poll_ceiling_secs: self.poll_ceiling_secs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&default_filter(&args.log_level), args.log_json);

    let config = args.settings().validate()?;

    // reqwest and tungstenite are built without a bundled crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        working_dir = %config.assistant.working_dir.display(),
        session_mode = %config.assistant.session_mode,
        relay_backend = ?config.relay_backend,
        terminal = ?config.terminal.as_ref().map(|t| t.target()),
        "Starting backchannel"
    );

    let transport = Arc::new(DiscordRest::new(config.transport.bot_token.clone())?);
    let router = Arc::new(Router::from_config(&config, transport));

    let (tx, mut rx) = mpsc::channel::<InboundMessage>(DISPATCH_BUFFER);
    let shutdown = CancellationToken::new();
    let gateway = Gateway::new(config.transport.bot_token.clone());
    let gateway_shutdown = shutdown.clone();
    let mut gateway_handle =
        tokio::spawn(async move { gateway.run(tx, gateway_shutdown).await });

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();
    tokio::pin!(sigterm_future);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let _ = router.dispatch(msg);
            }
            result = &mut gateway_handle => {
                match result {
                    Ok(Ok(())) => info!("Gateway listener exited"),
                    Ok(Err(e)) => error!(error = %e, "Gateway listener failed"),
                    Err(e) => error!(error = %e, "Gateway task panicked"),
                }
                shutdown.cancel();
                anyhow::bail!("gateway listener stopped");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                break;
            }
            _ = &mut sigterm_future => {
                info!("Received SIGTERM shutdown signal");
                break;
            }
        }
    }

    shutdown.cancel();
    let _ = gateway_handle.await;
    info!("Backchannel stopped");
    Ok(())
}
