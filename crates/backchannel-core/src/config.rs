//! Configuration for Backchannel.
//!
//! Settings arrive as loosely typed strings (environment variables and CLI
//! flags, merged by the binary) and are validated once into a [`Config`].
//! Any validation failure is a configuration error and is fatal at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::output::BLOCK_OVERHEAD;
use crate::session_mode::SessionMode;

/// Chat transport hard limit is 2000 characters; keep a safety margin.
pub const DEFAULT_MESSAGE_LIMIT: usize = 1900;
/// Per-stream capture ceiling for assistant output.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_CAPTURE_LINES: u32 = 200;

/// Smallest message limit that still leaves room for content inside a
/// formatting block.
const MIN_MESSAGE_LIMIT: usize = BLOCK_OVERHEAD + 16;

/// Unvalidated settings, one field per recognized option.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub bot_token: Option<String>,
    pub allowed_channel: Option<String>,
    pub allowed_user: Option<String>,
    pub session_mode: Option<String>,
    pub terminal_session_name: Option<String>,
    pub terminal_pane: Option<String>,
    pub relay_backend: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub claude_bin: Option<PathBuf>,
    pub tmux_bin: Option<PathBuf>,
    pub skip_permissions: Option<bool>,
    pub max_output_bytes: Option<usize>,
    pub message_limit: Option<usize>,
    pub capture_lines: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub poll_quiet_ms: Option<u64>,
    pub poll_ceiling_secs: Option<u64>,
}

/// Complete, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportConfig,
    pub assistant: AssistantConfig,
    /// Present only when a multiplexer session name is configured.
    pub terminal: Option<TerminalConfig>,
    pub relay_backend: RelayBackend,
}

/// Chat transport settings.
#[derive(Clone)]
pub struct TransportConfig {
    pub bot_token: String,
    pub allowed_channel: Option<String>,
    pub allowed_user: Option<String>,
    pub message_limit: usize,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("bot_token", &"<redacted>")
            .field("allowed_channel", &self.allowed_channel)
            .field("allowed_user", &self.allowed_user)
            .field("message_limit", &self.message_limit)
            .finish()
    }
}

/// Assistant CLI settings.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub claude_bin: PathBuf,
    pub working_dir: PathBuf,
    pub session_mode: SessionMode,
    pub skip_permissions: bool,
    pub max_output_bytes: usize,
}

/// Terminal multiplexer settings.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub session_name: String,
    pub pane: String,
    pub tmux_bin: PathBuf,
    pub capture_lines: u32,
    pub poll: PollConfig,
}

impl TerminalConfig {
    /// `<session>:<pane>` target understood by the multiplexer.
    pub fn target(&self) -> String {
        format!("{}:{}", self.session_name, self.pane)
    }
}

/// Stability polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub quiet_period: Duration,
    pub ceiling: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            quiet_period: Duration::from_secs(3),
            ceiling: Duration::from_secs(300),
        }
    }
}

/// Where relay prompts are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayBackend {
    /// One-shot assistant subprocess per prompt.
    #[default]
    Print,
    /// Type into the multiplexer pane and poll until output settles.
    Terminal,
}

impl FromStr for RelayBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "print" => Ok(Self::Print),
            "terminal" => Ok(Self::Terminal),
            other => Err(Error::Config(format!(
                "RELAY_BACKEND must be 'print' or 'terminal', not '{other}'"
            ))),
        }
    }
}

impl Settings {
    /// Validate into a [`Config`].
    pub fn validate(self) -> Result<Config> {
        let bot_token = self
            .bot_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Config("Required environment variable BOT_TOKEN is not set".to_string())
            })?;

        let allowed_channel = validate_chat_id("ALLOWED_CHANNEL", self.allowed_channel)?;
        let allowed_user = validate_chat_id("ALLOWED_USER", self.allowed_user)?;

        let session_mode = match self.session_mode.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => SessionMode::default(),
        };

        let relay_backend = match self.relay_backend.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => RelayBackend::default(),
        };

        let message_limit = self.message_limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
        if message_limit < MIN_MESSAGE_LIMIT {
            return Err(Error::Config(format!(
                "MESSAGE_LIMIT must be at least {MIN_MESSAGE_LIMIT}, got {message_limit}"
            )));
        }

        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let defaults = PollConfig::default();
        let poll = PollConfig {
            interval: self
                .poll_interval_ms
                .map_or(defaults.interval, Duration::from_millis),
            quiet_period: self
                .poll_quiet_ms
                .map_or(defaults.quiet_period, Duration::from_millis),
            ceiling: self
                .poll_ceiling_secs
                .map_or(defaults.ceiling, Duration::from_secs),
        };
        if poll.interval.is_zero() {
            return Err(Error::Config("POLL_INTERVAL_MS must be positive".to_string()));
        }

        let terminal = self
            .terminal_session_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .map(|session_name| TerminalConfig {
                session_name,
                pane: self
                    .terminal_pane
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| "0".to_string()),
                tmux_bin: self.tmux_bin.unwrap_or_else(|| PathBuf::from("tmux")),
                capture_lines: self.capture_lines.unwrap_or(DEFAULT_CAPTURE_LINES),
                poll,
            });

        if relay_backend == RelayBackend::Terminal && terminal.is_none() {
            return Err(Error::Config(
                "RELAY_BACKEND=terminal requires TERMINAL_SESSION_NAME".to_string(),
            ));
        }

        Ok(Config {
            transport: TransportConfig {
                bot_token,
                allowed_channel,
                allowed_user,
                message_limit,
            },
            assistant: AssistantConfig {
                claude_bin: self.claude_bin.unwrap_or_else(|| PathBuf::from("claude")),
                working_dir,
                session_mode,
                skip_permissions: self.skip_permissions.unwrap_or(true),
                max_output_bytes: self.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES),
            },
            terminal,
            relay_backend,
        })
    }
}

/// Chat ids are numeric snowflakes; anything else is almost certainly a
/// user name or channel name pasted by mistake.
fn validate_chat_id(var: &str, value: Option<String>) -> Result<Option<String>> {
    let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "{var} must be a numeric ID, not '{value}'. To get an ID: enable Developer Mode \
             in the chat client settings, then right-click the user/channel and select 'Copy ID'."
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal() -> Settings {
        Settings {
            bot_token: Some("test-token".into()),
            working_dir: Some(PathBuf::from("/tmp")),
            ..Settings::default()
        }
    }

    #[test]
    fn minimal_settings_use_defaults() {
        let config = minimal().validate().unwrap();
        assert_eq!(config.assistant.session_mode, SessionMode::Continue);
        assert_eq!(config.transport.message_limit, DEFAULT_MESSAGE_LIMIT);
        assert!(config.transport.allowed_user.is_none());
        assert!(config.transport.allowed_channel.is_none());
        assert!(config.terminal.is_none());
        assert_eq!(config.relay_backend, RelayBackend::Print);
        assert!(config.assistant.skip_permissions);
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let err = Settings::default().validate().unwrap_err();
        assert!(err.to_string().contains("BOT_TOKEN"));

        let blank = Settings {
            bot_token: Some("  ".into()),
            ..minimal()
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn non_numeric_ids_are_rejected() {
        let settings = Settings {
            allowed_channel: Some("my-channel".into()),
            ..minimal()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ALLOWED_CHANNEL must be a numeric"));

        let settings = Settings {
            allowed_user: Some("username#1234".into()),
            ..minimal()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("ALLOWED_USER must be a numeric"));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let settings = Settings {
            allowed_channel: Some("123456789012345678".into()),
            allowed_user: Some("987654321098765432".into()),
            ..minimal()
        };
        let config = settings.validate().unwrap();
        assert_eq!(
            config.transport.allowed_channel.as_deref(),
            Some("123456789012345678")
        );
        assert_eq!(
            config.transport.allowed_user.as_deref(),
            Some("987654321098765432")
        );
    }

    #[test]
    fn session_mode_is_parsed() {
        let settings = Settings {
            session_mode: Some("resume:abc-123".into()),
            ..minimal()
        };
        let config = settings.validate().unwrap();
        assert_eq!(
            config.assistant.session_mode,
            SessionMode::Resume("abc-123".into())
        );

        let settings = Settings {
            session_mode: Some("sometimes".into()),
            ..minimal()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn terminal_section_requires_session_name() {
        let settings = Settings {
            terminal_session_name: Some("work".into()),
            ..minimal()
        };
        let terminal = settings.validate().unwrap().terminal.unwrap();
        assert_eq!(terminal.target(), "work:0");
        assert_eq!(terminal.capture_lines, DEFAULT_CAPTURE_LINES);
        assert_eq!(terminal.poll, PollConfig::default());
    }

    #[test]
    fn terminal_backend_without_session_is_rejected() {
        let settings = Settings {
            relay_backend: Some("terminal".into()),
            ..minimal()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("TERMINAL_SESSION_NAME"));
    }

    #[test]
    fn tiny_message_limit_is_rejected() {
        let settings = Settings {
            message_limit: Some(10),
            ..minimal()
        };
        assert!(settings.validate().is_err());
    }
}
