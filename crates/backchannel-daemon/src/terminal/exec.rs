//! Multiplexer command execution.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::types::{TerminalError, TmuxOutput};

/// Runs one tmux subcommand and collects its output.
///
/// Nonzero exit is reported through [`TmuxOutput::success`], not as an error;
/// errors mean the executable could not be run at all.
#[async_trait]
pub trait TmuxExec: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<TmuxOutput, TerminalError>;
}

/// [`TmuxExec`] backed by the real `tmux` binary.
#[derive(Debug, Clone)]
pub struct SystemTmux {
    bin: PathBuf,
}

impl SystemTmux {
    pub const fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl TmuxExec for SystemTmux {
    async fn run(&self, args: &[String]) -> Result<TmuxOutput, TerminalError> {
        debug!(bin = %self.bin.display(), ?args, "Running tmux");
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TerminalError::NotInstalled {
                        bin: self.bin.display().to_string(),
                    }
                } else {
                    TerminalError::Io(e)
                }
            })?;

        Ok(TmuxOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
