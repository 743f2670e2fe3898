//! Stability polling over pane captures.
//!
//! The pane is captured at a fixed interval and normalized. Once the text
//! stops changing for the quiet period the response is considered complete.
//! The loop stops early on cancellation or when the ceiling elapses.

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use backchannel_core::config::PollConfig;
use backchannel_core::normalize;

use super::types::{PaneSnapshot, TerminalError};

/// Anything that can produce pane snapshots.
#[async_trait]
pub trait PaneSource: Send + Sync {
    async fn snapshot(&self) -> Result<PaneSnapshot, TerminalError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Output settled for the quiet period.
    Complete,
    /// Ceiling elapsed while output was still changing.
    Partial,
    /// Cancelled by an interrupt.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Normalized text produced since the baseline.
    pub text: String,
    pub status: PollStatus,
}

/// Poll `source` until its normalized text is stable.
///
/// `baseline` is the normalized capture taken before input was sent.
pub async fn poll_until_stable<S: PaneSource + ?Sized>(
    source: &S,
    baseline: &str,
    config: PollConfig,
    cancel: &CancellationToken,
) -> Result<PollOutcome, TerminalError> {
    let started = Instant::now();
    let mut last_text: Option<String> = None;
    let mut last_change = started;

    let outcome = |text: &Option<String>, status| PollOutcome {
        text: text
            .as_deref()
            .map(|t| delta(baseline, t))
            .unwrap_or_default(),
        status,
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Poll interrupted");
                return Ok(outcome(&last_text, PollStatus::Interrupted));
            }
            () = sleep(config.interval) => {}
        }

        let snapshot = source.snapshot().await?;
        let text = settle(&snapshot.text);
        let now = snapshot.captured_at;

        if last_text.as_deref() == Some(text.as_str()) {
            if now.duration_since(last_change) >= config.quiet_period {
                debug!(elapsed_ms = started.elapsed().as_millis(), "Pane output stable");
                return Ok(outcome(&last_text, PollStatus::Complete));
            }
        } else {
            last_text = Some(text);
            last_change = now;
        }

        if now.duration_since(started) >= config.ceiling {
            info!(
                ceiling_secs = config.ceiling.as_secs(),
                "Poll ceiling reached while output still changing"
            );
            return Ok(outcome(&last_text, PollStatus::Partial));
        }
    }
}

/// Normalized capture with trailing blank pane rows removed.
pub(crate) fn settle(raw: &str) -> String {
    normalize(raw).trim_end().to_string()
}

/// Text added to `current` since `baseline`.
///
/// Handles scrolled panes: when the baseline's leading lines have scrolled
/// out of the capture window, the longest remaining baseline suffix that
/// prefixes `current` is stripped. With no overlap the whole capture is new.
pub fn delta(baseline: &str, current: &str) -> String {
    if baseline.is_empty() {
        return current.to_string();
    }

    let lines: Vec<&str> = baseline.split('\n').collect();
    for start in 0..lines.len() {
        let tail = lines[start..].join("\n");
        if tail.is_empty() {
            continue;
        }
        if let Some(rest) = current.strip_prefix(tail.as_str()) {
            return rest.trim_start_matches('\n').to_string();
        }
    }
    current.to_string()
}
