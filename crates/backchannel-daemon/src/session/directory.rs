//! Read-only view of the assistant's session store.
//!
//! Claude Code keeps one JSONL log per session under
//! `~/.claude/projects/<encoded working dir>/<session uuid>.jsonl`.
//! Nothing here writes to or caches that store.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use tracing::debug;

use super::types::SessionRecord;

/// First prompts are capped at this many characters.
pub const FIRST_PROMPT_MAX_CHARS: usize = 80;
const NO_PROMPT: &str = "(no prompt found)";
const SESSION_ID_LEN: usize = 36;

#[derive(Debug, Clone)]
pub struct SessionDirectory {
    projects_root: PathBuf,
    working_dir: PathBuf,
}

#[derive(Deserialize)]
struct LogEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: Option<LogMessage>,
}

#[derive(Deserialize)]
struct LogMessage {
    #[serde(default)]
    content: Option<serde_json::Value>,
}

/// UUID shape: 36 characters with four dashes.
pub fn looks_like_session_id(value: &str) -> bool {
    value.len() == SESSION_ID_LEN
        && value.matches('-').count() == 4
        && value.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

impl SessionDirectory {
    /// Directory for `working_dir` under the default store location.
    ///
    /// Falls back to a relative `.claude/projects` when the home directory is
    /// unknown, which simply yields an empty listing.
    pub fn new(working_dir: PathBuf) -> Self {
        let projects_root = dirs::home_dir()
            .unwrap_or_default()
            .join(".claude")
            .join("projects");
        Self::with_root(projects_root, working_dir)
    }

    pub const fn with_root(projects_root: PathBuf, working_dir: PathBuf) -> Self {
        Self {
            projects_root,
            working_dir,
        }
    }

    /// Store directory holding this working directory's session logs.
    pub fn store_dir(&self) -> PathBuf {
        self.projects_root.join(encode_project_dir(&self.working_dir))
    }

    /// Lazily iterate sessions, most recent first.
    ///
    /// Only file metadata is read up front; each log is opened when its
    /// record is pulled. Calling again rescans the store.
    pub fn recent(&self) -> impl Iterator<Item = SessionRecord> + use<> {
        let dir = self.store_dir();
        let mut candidates: Vec<(String, SystemTime, PathBuf)> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(std::result::Result::ok)
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().is_none_or(|ext| ext != "jsonl") {
                        return None;
                    }
                    let id = path.file_stem()?.to_str()?.to_string();
                    if !looks_like_session_id(&id) {
                        return None;
                    }
                    match entry.metadata().and_then(|m| m.modified()) {
                        Ok(modified) => Some((id, modified, path)),
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "Skipping unreadable session log");
                            None
                        }
                    }
                })
                .collect(),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No session store for working directory");
                Vec::new()
            }
        };

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        candidates
            .into_iter()
            .map(|(id, timestamp, path)| SessionRecord {
                id,
                timestamp,
                first_prompt: read_first_prompt(&path).unwrap_or_else(|| NO_PROMPT.to_string()),
            })
    }

    /// Up to `limit` most recent sessions.
    pub fn list_recent(&self, limit: usize) -> Vec<SessionRecord> {
        self.recent().take(limit).collect()
    }

    /// Look up a session by id. Best effort: the assistant is the authority.
    pub fn find(&self, id: &str) -> Option<SessionRecord> {
        if !looks_like_session_id(id) {
            return None;
        }
        let path = self.store_dir().join(format!("{id}.jsonl"));
        let timestamp = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        Some(SessionRecord {
            id: id.to_string(),
            timestamp,
            first_prompt: read_first_prompt(&path).unwrap_or_else(|| NO_PROMPT.to_string()),
        })
    }
}

/// Claude Code names project directories after the absolute working path
/// with every non-alphanumeric character replaced by `-`.
fn encode_project_dir(working_dir: &Path) -> String {
    working_dir
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn read_first_prompt(path: &Path) -> Option<String> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not open session log");
            return None;
        }
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let Ok(entry) = serde_json::from_str::<LogEntry>(&line) else {
            continue;
        };
        if entry.kind != "user" {
            continue;
        }
        let text = entry
            .message
            .and_then(|m| m.content)
            .and_then(|content| prompt_text(&content));
        if let Some(text) = text {
            return Some(text.chars().take(FIRST_PROMPT_MAX_CHARS).collect());
        }
    }
    None
}

fn prompt_text(content: &serde_json::Value) -> Option<String> {
    let text = match content {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Array(blocks) => blocks.first()?.get("text")?.as_str()?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
