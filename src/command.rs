//! Parsing of in-game commands addressed to the bot.
//!
//! Players talk to the recorder through ordinary chat lines starting with the configured prefix.
//! This module turns the raw chat JSON into `(message, sender)` and the message into a typed
//! [`Command`]; execution lives with the lifecycle client.

use serde_json::Value;
use uuid::Uuid;

/// The internal error type for all errors related to command handling.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// The command form is not recognized.
    #[error("unknown command")]
    Unknown,

    /// The command is known but its arguments do not parse.
    #[error("wrong command arguments")]
    WrongArguments,

    /// The issuer is not whitelisted.
    #[error("permission denied")]
    PermissionDenied,

    /// The `set` option is unknown or not settable at runtime.
    #[error("illegal option: {0}")]
    IllegalOption(String),
}

/// One parsed in-game command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Spectate,
    Here,
    Position,
    Stop,
    Restart,
    SetList,
    Set { option: String, value: String },
    MarkerList,
    MarkerAdd { name: Option<String> },
    MarkerDelete { index: usize },
    Name { file_name: String },
    Respawn,
}

/// Parses a chat line into a command.
///
/// Returns `None` when the line is not addressed to the bot at all.
pub fn parse(prefix: &str, message: &str) -> Option<Result<Command, CommandError>> {
    let args: Vec<&str> = message.split(' ').collect();
    if args.first() != Some(&prefix) {
        return None;
    }

    let command = match args.as_slice() {
        [_] => Ok(Command::Help),
        [_, "status"] => Ok(Command::Status),
        [_, "spectate" | "spec"] => Ok(Command::Spectate),
        [_, "here"] => Ok(Command::Here),
        [_, "where" | "location" | "loc" | "position" | "pos"] => Ok(Command::Position),
        [_, "stop"] => Ok(Command::Stop),
        [_, "restart"] => Ok(Command::Restart),
        [_, "set"] => Ok(Command::SetList),
        [_, "set", option, value] => Ok(Command::Set {
            option: (*option).to_string(),
            value: (*value).to_string(),
        }),
        [_, "marker"] | [_, "marker", "list"] => Ok(Command::MarkerList),
        [_, "marker", "add"] => Ok(Command::MarkerAdd { name: None }),
        [_, "marker", "add", name] => Ok(Command::MarkerAdd {
            name: Some((*name).to_string()),
        }),
        [_, "marker", "del" | "delete", index] => index
            .parse()
            .map(|index| Command::MarkerDelete { index })
            .map_err(|_| CommandError::WrongArguments),
        [_, "name", file_name] => Ok(Command::Name {
            file_name: (*file_name).to_string(),
        }),
        [_, "respawn"] => Ok(Command::Respawn),
        _ => Err(CommandError::Unknown),
    };

    Some(command)
}

/// A chat line extracted from the clientbound chat JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub message: String,
    pub player_name: Option<String>,
    pub player_uuid: Option<Uuid>,
}

/// Digs the spoken text and its sender out of the vanilla chat component JSON.
///
/// Covers server announcements (`/say`) and regular player chat across the 1.15/1.16 hover-event
/// encodings. Anything else (emotes, whispers, join messages) carries no commands.
pub fn extract_chat_line(json: &str) -> Option<ChatLine> {
    let root: Value = serde_json::from_str(json).ok()?;
    let translate = root.get("translate")?.as_str()?;
    let with = root.get("with")?.as_array()?;

    let last = with.last()?;
    let message = match last {
        Value::String(text) => text.clone(),
        // some servers wrap the message in a component
        Value::Object(_) => last.get("text")?.as_str()?.to_string(),
        _ => return None,
    };

    match translate {
        "chat.type.announcement" => Some(ChatLine {
            message,
            player_name: None,
            player_uuid: None,
        }),
        "chat.type.text" => {
            let sender = with.first()?;
            let player_name = sender
                .get("insertion")
                .and_then(Value::as_str)
                .map(str::to_string);
            let player_uuid = extract_sender_uuid(sender);
            Some(ChatLine {
                message,
                player_name,
                player_uuid,
            })
        }
        _ => None,
    }
}

fn extract_sender_uuid(sender: &Value) -> Option<Uuid> {
    // 1.16 servers carry the id under hoverEvent.contents
    if let Some(id) = sender
        .pointer("/hoverEvent/contents/id")
        .and_then(Value::as_str)
    {
        return Uuid::parse_str(id).ok();
    }

    // 1.15 servers embed an SNBT entity blob under hoverEvent.value
    let value = sender.pointer("/hoverEvent/value")?;
    let text = match value {
        Value::String(text) => text.as_str(),
        _ => value
            .pointer("/text")
            .or_else(|| value.pointer("/0/text"))?
            .as_str()?,
    };
    let start = text.find(",id:\"")? + ",id:\"".len();
    let end = text[start..].find('"')? + start;
    Uuid::parse_str(&text[start..end]).ok()
}
