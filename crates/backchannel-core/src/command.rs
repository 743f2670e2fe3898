//! Command classification for inbound chat text.
//!
//! Text that starts with [`COMMAND_PREFIX`] is control-plane; everything else
//! is relayed to the assistant verbatim.

use thiserror::Error;

/// Reserved first character of a control command.
pub const COMMAND_PREFIX: char = '!';

/// Classified inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(Command),
    Prompt(String),
}

/// Recognized control commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Interrupt,
    /// Multiplexer subcommand passed through unparsed.
    Raw(String),
    /// `None` lists sessions, `Some` switches mode.
    Session(Option<SessionArg>),
}

/// Argument of `!session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionArg {
    Continue,
    Fresh,
    /// 1-based index into the recent-sessions listing.
    Index(usize),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown command: `{COMMAND_PREFIX}{0}`")]
    Unknown(String),

    #[error("`{COMMAND_PREFIX}{command}` takes no arguments")]
    UnexpectedArguments { command: &'static str },

    #[error("`{COMMAND_PREFIX}{command}` requires an argument: {usage}")]
    MissingArgument {
        command: &'static str,
        usage: &'static str,
    },

    #[error("`{COMMAND_PREFIX}session` takes at most one argument")]
    TooManyArguments,
}

/// Split inbound text into a command or a relay prompt.
pub fn classify(text: &str) -> Result<Inbound, ParseError> {
    let Some(body) = text.strip_prefix(COMMAND_PREFIX) else {
        return Ok(Inbound::Prompt(text.to_string()));
    };

    let body = body.trim_start();
    let (name, rest) = body
        .split_once(char::is_whitespace)
        .map_or((body, ""), |(name, rest)| (name, rest.trim()));

    let command = match name.to_ascii_lowercase().as_str() {
        "status" => {
            no_args("status", rest)?;
            Command::Status
        }
        "interrupt" => {
            no_args("interrupt", rest)?;
            Command::Interrupt
        }
        "raw" => {
            if rest.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "raw",
                    usage: "!raw <tmux subcommand>",
                });
            }
            Command::Raw(rest.to_string())
        }
        "session" => Command::Session(parse_session_arg(rest)?),
        _ => return Err(ParseError::Unknown(name.to_string())),
    };
    Ok(Inbound::Command(command))
}

const fn no_args(command: &'static str, rest: &str) -> Result<(), ParseError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ParseError::UnexpectedArguments { command })
    }
}

fn parse_session_arg(rest: &str) -> Result<Option<SessionArg>, ParseError> {
    let mut parts = rest.split_whitespace();
    let Some(arg) = parts.next() else {
        return Ok(None);
    };
    if parts.next().is_some() {
        return Err(ParseError::TooManyArguments);
    }

    let arg = match arg.to_ascii_lowercase().as_str() {
        "continue" => SessionArg::Continue,
        "fresh" => SessionArg::Fresh,
        _ => match arg.parse::<usize>() {
            Ok(index) => SessionArg::Index(index),
            Err(_) => SessionArg::Id(arg.to_string()),
        },
    };
    Ok(Some(arg))
}
