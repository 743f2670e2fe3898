//! Output normalization and chunking.
//!
//! [`normalize`] strips terminal control sequences with a small state machine.
//! [`chunk`] splits text into segments of at most `limit` characters whose
//! concatenation is exactly the input.

/// Opening/closing of the formatting block used for terminal-shaped text.
const BLOCK_OPEN: &str = "```\n";
const BLOCK_CLOSE: &str = "\n```";

/// Characters added by wrapping a segment in a formatting block.
pub const BLOCK_OVERHEAD: usize = BLOCK_OPEN.len() + BLOCK_CLOSE.len();

const ESC: char = '\u{1b}';
const BEL: char = '\u{07}';
const CSI_8BIT: char = '\u{9b}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    /// Saw ESC, waiting for the introducer.
    Escape,
    /// ESC followed by intermediate bytes (charset designation etc).
    EscapeIntermediate,
    /// Control Sequence: parameters until a final byte in `@..=~`.
    Csi,
    /// Operating System Command: until BEL or ST.
    Osc,
    /// DCS / SOS / PM / APC: until ST.
    Str,
    /// Saw ESC inside an OSC or string; `\` completes ST.
    StrEscape,
    /// SS2 / SS3: exactly one more character.
    SingleShift,
}

/// Strip terminal escape sequences and stray control characters.
///
/// Newlines and tabs are kept. Carriage returns and other C0 controls are
/// dropped, so `\r\n` line endings become `\n`.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = State::Ground;

    for ch in text.chars() {
        state = match state {
            State::Ground => match ch {
                ESC => State::Escape,
                CSI_8BIT => State::Csi,
                '\n' | '\t' => {
                    out.push(ch);
                    State::Ground
                }
                c if c.is_control() => State::Ground,
                c => {
                    out.push(c);
                    State::Ground
                }
            },
            State::Escape => match ch {
                '[' => State::Csi,
                ']' => State::Osc,
                'P' | 'X' | '^' | '_' => State::Str,
                'N' | 'O' => State::SingleShift,
                ESC => State::Escape,
                '\u{20}'..='\u{2f}' => State::EscapeIntermediate,
                // Any other final byte ends a two-character sequence.
                _ => State::Ground,
            },
            State::EscapeIntermediate => match ch {
                '\u{20}'..='\u{2f}' => State::EscapeIntermediate,
                ESC => State::Escape,
                _ => State::Ground,
            },
            State::Csi => match ch {
                '\u{40}'..='\u{7e}' => State::Ground,
                ESC => State::Escape,
                _ => State::Csi,
            },
            State::Osc => match ch {
                BEL => State::Ground,
                ESC => State::StrEscape,
                _ => State::Osc,
            },
            State::Str => match ch {
                ESC => State::StrEscape,
                _ => State::Str,
            },
            State::StrEscape => match ch {
                '\\' => State::Ground,
                ESC => State::StrEscape,
                // Unterminated string followed by a new sequence.
                '[' => State::Csi,
                ']' => State::Osc,
                _ => State::Str,
            },
            State::SingleShift => State::Ground,
        };
    }
    out
}

/// Split `text` into ordered segments of at most `limit` characters.
///
/// Breaks after the last newline in the window when there is one, then after
/// the last space, then hard-cuts at `limit`. Concatenating the segments
/// reproduces `text` exactly. A `limit` of zero is treated as one.
pub fn chunk(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset just past the first `limit` characters, or None if the
        // remainder already fits.
        let Some((window_end, _)) = remaining.char_indices().nth(limit) else {
            chunks.push(remaining.to_string());
            break;
        };
        let window = &remaining[..window_end];

        let split = window
            .rfind('\n')
            .filter(|&pos| pos > 0)
            .or_else(|| window.rfind(' ').filter(|&pos| pos > 0))
            .map_or(window_end, |pos| pos + 1);

        chunks.push(remaining[..split].to_string());
        remaining = &remaining[split..];
    }
    chunks
}

/// How a segment is presented in chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Assistant stdout: already prose, sent unwrapped.
    Prose,
    /// Terminal capture: wrapped in a fixed-width formatting block.
    Terminal,
}

/// Normalize, chunk and present `text` for a transport with `limit`.
///
/// Terminal segments are chunked to `limit - BLOCK_OVERHEAD` so the wrapped
/// message still fits. Whitespace-only input yields no messages.
pub fn render(text: &str, presentation: Presentation, limit: usize) -> Vec<String> {
    let normalized = normalize(text);
    if normalized.trim().is_empty() {
        return Vec::new();
    }
    match presentation {
        Presentation::Prose => chunk(&normalized, limit),
        Presentation::Terminal => chunk(&normalized, limit.saturating_sub(BLOCK_OVERHEAD))
            .into_iter()
            .map(|segment| format!("{BLOCK_OPEN}{segment}{BLOCK_CLOSE}"))
            .collect(),
    }
}
