//! `!session` listing text.

use std::fmt::Write as _;

use chrono::{DateTime, Local};

use backchannel_core::SessionMode;

use crate::session::SessionRecord;

/// Sessions shown by `!session`.
pub const LISTING_LIMIT: usize = 10;
const PROMPT_PREVIEW_CHARS: usize = 50;

pub fn render_listing(mode: &SessionMode, sessions: &[SessionRecord]) -> String {
    let mut out = format!("**Current mode:** `{mode}`\n\n");

    if sessions.is_empty() {
        out.push_str(
            "No sessions found for this working directory. \
             Sessions appear here once Claude has been used in it.\n",
        );
    } else {
        out.push_str("**Recent sessions:**\n");
        for (index, record) in sessions.iter().enumerate() {
            let when: DateTime<Local> = record.timestamp.into();
            let _ = writeln!(
                out,
                "`{}.` `{}` {}\n    {}",
                index + 1,
                record.id,
                when.format("%Y-%m-%d %H:%M"),
                preview(&record.first_prompt),
            );
        }
    }

    out.push_str(
        "\nSwitch with `!session <n>`, `!session <id>`, \
         `!session continue` or `!session fresh`.",
    );
    out
}

pub fn describe_mode(mode: &SessionMode) -> String {
    match mode {
        SessionMode::Continue => {
            "✅ Session mode: `continue` (prompts extend the most recent conversation)".to_string()
        }
        SessionMode::Fresh => {
            "✅ Session mode: `fresh` (each prompt starts a new conversation)".to_string()
        }
        SessionMode::Resume(id) => format!("✅ Session mode: resume `{id}`"),
    }
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_PREVIEW_CHARS {
        return prompt.to_string();
    }
    let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
    format!("{head}...")
}
