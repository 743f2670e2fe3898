//! Claude Code one-shot ("print" mode) invoker.
//!
//! Each relay prompt runs `claude -p` once with no stdin attached, captures
//! stdout/stderr up to a ceiling, and reports the exit code. There is no
//! retry and no cancellation: a failed invocation is reported once.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use backchannel_core::SessionMode;
use backchannel_core::config::AssistantConfig;

/// Characters of stderr kept in a failure report.
pub const STDERR_TAIL_CHARS: usize = 1500;

/// Strategy for handling permission prompts in the subprocess.
///
/// Nobody can answer an interactive prompt over chat, so the default skips
/// permission checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PermissionStrategy {
    /// Use `--dangerously-skip-permissions` to bypass all checks.
    #[default]
    SkipPermissions,
    /// Pass no permission flags; the assistant's own settings apply.
    AssistantDefault,
}

/// One prompt to relay.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub prompt: String,
    /// Snapshot of the session mode taken when the request was created.
    pub mode: SessionMode,
    pub working_directory: PathBuf,
}

/// Captured outcome of a completed process.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl InvocationResult {
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Last [`STDERR_TAIL_CHARS`] characters of stderr, or a placeholder.
    pub fn stderr_tail(&self) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            return "command failed".to_string();
        }
        let count = trimmed.chars().count();
        if count <= STDERR_TAIL_CHARS {
            return trimmed.to_string();
        }
        let tail: String = trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect();
        format!("...{tail}")
    }
}

/// Errors raised before a result could be produced.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("assistant executable not found: {bin}")]
    NotInstalled { bin: String },

    #[error("working directory does not exist: {path}")]
    MissingWorkingDirectory { path: String },

    #[error("failed to launch assistant: {reason}")]
    SpawnFailed { reason: String },

    #[error("failed to collect assistant output: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns the assistant CLI for relay prompts.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    /// Path to the `claude` binary.
    claude_bin: PathBuf,
    permission_strategy: PermissionStrategy,
    /// Per-stream capture ceiling.
    max_output_bytes: usize,
}

impl ProcessInvoker {
    pub const fn new(
        claude_bin: PathBuf,
        permission_strategy: PermissionStrategy,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            claude_bin,
            permission_strategy,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        let strategy = if config.skip_permissions {
            PermissionStrategy::SkipPermissions
        } else {
            PermissionStrategy::AssistantDefault
        };
        Self::new(config.claude_bin.clone(), strategy, config.max_output_bytes)
    }

    /// Argument list for a request. The prompt is always last.
    pub fn build_args(&self, request: &InvocationRequest) -> Vec<String> {
        let mut args = vec!["-p".to_string()];

        match &request.mode {
            SessionMode::Continue => args.push("--continue".to_string()),
            SessionMode::Fresh => {}
            SessionMode::Resume(id) => {
                args.push("--resume".to_string());
                args.push(id.clone());
            }
        }

        match &self.permission_strategy {
            PermissionStrategy::SkipPermissions => {
                args.push("--dangerously-skip-permissions".to_string());
            }
            PermissionStrategy::AssistantDefault => {}
        }

        // Keep a prompt like "-v please" from being read as a flag.
        if request.prompt.starts_with('-') {
            args.push("--".to_string());
        }
        args.push(request.prompt.clone());
        args
    }

    /// Run one invocation to completion.
    ///
    /// Blocks the calling task (not the runtime) until the process exits.
    #[instrument(skip(self, request), fields(mode = %request.mode))]
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, SubprocessError> {
        if !request.working_directory.is_dir() {
            return Err(SubprocessError::MissingWorkingDirectory {
                path: request.working_directory.display().to_string(),
            });
        }

        let args = self.build_args(request);
        let mut cmd = Command::new(&self.claude_bin);
        cmd.args(&args)
            .current_dir(&request.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Ensure essential env vars are available to the subprocess even
        // when running under a service manager with a stripped environment.
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", &home);
        }
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", &path);
        }

        info!(
            working_dir = %request.working_directory.display(),
            resume_session = ?request.mode.resume_id(),
            prompt_chars = request.prompt.chars().count(),
            "Spawning claude subprocess"
        );
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SubprocessError::NotInstalled {
                    bin: self.claude_bin.display().to_string(),
                }
            } else {
                SubprocessError::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SubprocessError::SpawnFailed {
                reason: "Failed to capture stdout".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SubprocessError::SpawnFailed {
                reason: "Failed to capture stderr".to_string(),
            })?;

        // Drain both pipes concurrently so neither fills up and stalls the child.
        let (stdout, stderr) = tokio::try_join!(
            read_capped(stdout, self.max_output_bytes),
            read_capped(stderr, self.max_output_bytes),
        )?;
        let status = child.wait().await?;

        let result = InvocationResult {
            stdout,
            stderr,
            exit_code: status.code(),
            duration: started.elapsed(),
        };

        if result.is_success() {
            debug!(
                stdout_chars = result.stdout.len(),
                duration_ms = result.duration.as_millis(),
                "claude subprocess succeeded"
            );
        } else {
            warn!(
                exit_code = ?result.exit_code,
                duration_ms = result.duration.as_millis(),
                "claude subprocess failed"
            );
        }
        Ok(result)
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Excess bytes are still consumed and reported with an explicit marker.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<String> {
    let mut kept = Vec::new();
    let mut omitted: usize = 0;
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        let take = room.min(n);
        kept.extend_from_slice(&buf[..take]);
        omitted += n - take;
    }

    // The cap may split a multi-byte character; drop the partial tail.
    if omitted > 0
        && let Err(e) = std::str::from_utf8(&kept)
        && e.error_len().is_none()
    {
        omitted += kept.len() - e.valid_up_to();
        kept.truncate(e.valid_up_to());
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if omitted > 0 {
        text.push_str(&format!("\n[output truncated: {omitted} bytes omitted]"));
    }
    Ok(text)
}
