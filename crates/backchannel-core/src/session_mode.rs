//! Continuation mode for assistant invocations.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Which prior conversation a new invocation extends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Continue the most recent session in the working directory.
    #[default]
    Continue,
    /// Start a new session every time.
    Fresh,
    /// Resume a specific session by id.
    Resume(String),
}

impl SessionMode {
    /// Session id when resuming, `None` otherwise.
    pub fn resume_id(&self) -> Option<&str> {
        match self {
            Self::Resume(id) => Some(id),
            Self::Continue | Self::Fresh => None,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::Fresh => f.write_str("fresh"),
            Self::Resume(id) => write!(f, "resume:{id}"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "continue" => return Ok(Self::Continue),
            "fresh" => return Ok(Self::Fresh),
            _ => {}
        }
        let resume = value
            .split_once(':')
            .filter(|(prefix, _)| prefix.eq_ignore_ascii_case("resume"));
        if let Some((_, id)) = resume {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::Config(
                    "SESSION_MODE 'resume:' requires a session ID. Use 'resume:<session_id>' format."
                        .to_string(),
                ));
            }
            return Ok(Self::Resume(id.to_string()));
        }
        Err(Error::Config(format!(
            "SESSION_MODE must be 'fresh', 'continue', or 'resume:<session_id>', not '{value}'"
        )))
    }
}
