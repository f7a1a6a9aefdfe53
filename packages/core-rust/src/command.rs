//! Command schema shared by producers and the processing pipeline.
//!
//! A [`Command`] travels as a JSON object:
//!
//! ```json
//! {"type": "add-item", "key": "a", "value": "1", "id": "2f0c..."}
//! ```
//!
//! `key`, `value` and `id` are omitted when empty. The `type` string is kept
//! even when it names no known operation (see [`CommandType::Unrecognized`])
//! so that the processor can report what it discarded.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Usage line shown for malformed text commands.
pub const USAGE: &str =
    "add-item <key> <value>, get-item <key>, delete-item <key>, get-all-items";

/// Errors from decoding or parsing a command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("empty command")]
    Empty,
    #[error("invalid command, usage: {usage}")]
    Usage { usage: &'static str },
}

/// The operation a command requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandType {
    /// Insert or overwrite a key.
    Add,
    /// Remove a key.
    Delete,
    /// Read one key.
    Get,
    /// Read every entry in insertion order.
    GetAll,
    /// A `type` string this version does not understand.
    Unrecognized(String),
}

impl CommandType {
    /// Wire name of this command type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add-item",
            Self::Delete => "delete-item",
            Self::Get => "get-item",
            Self::GetAll => "get-all-items",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for CommandType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "add-item" => Self::Add,
            "delete-item" => Self::Delete,
            "get-item" => Self::Get,
            "get-all-items" => Self::GetAll,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<CommandType> for String {
    fn from(ty: CommandType) -> Self {
        match ty {
            CommandType::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested mutation or query against the map.
///
/// `id` is assigned by the producer so the queue transport can deduplicate
/// redeliveries; the map never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl Command {
    fn with_fresh_id(kind: CommandType, key: String, value: String) -> Self {
        Self {
            kind,
            key,
            value,
            id: Uuid::new_v4().to_string(),
        }
    }

    /// `add-item` for `key` = `value`.
    #[must_use]
    pub fn add(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_fresh_id(CommandType::Add, key.into(), value.into())
    }

    /// `delete-item` for `key`.
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::with_fresh_id(CommandType::Delete, key.into(), String::new())
    }

    /// `get-item` for `key`.
    #[must_use]
    pub fn get(key: impl Into<String>) -> Self {
        Self::with_fresh_id(CommandType::Get, key.into(), String::new())
    }

    /// `get-all-items`.
    #[must_use]
    pub fn get_all() -> Self {
        Self::with_fresh_id(CommandType::GetAll, String::new(), String::new())
    }

    /// Decodes a queue message body.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Decode`] if the body is not a JSON object with
    /// a string `type` field.
    pub fn decode(body: &str) -> Result<Self, CommandError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Encodes this command as a single-line JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Decode`] if serialization fails.
    pub fn encode(&self) -> Result<String, CommandError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an interactive text command such as `add-item k v`.
    ///
    /// Tokens are separated by whitespace. Tokens past the ones a verb takes
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Empty`] for a blank line, and
    /// [`CommandError::Usage`] for an unknown verb or wrong argument count.
    pub fn parse_text(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(CommandError::Empty)?;
        let args: Vec<&str> = parts.collect();

        match CommandType::from(verb.to_string()) {
            CommandType::Add => match args.as_slice() {
                [key, value, ..] => Ok(Self::add(*key, *value)),
                _ => Err(CommandError::Usage {
                    usage: "add-item <key> <value>",
                }),
            },
            CommandType::Get => match args.first() {
                Some(key) => Ok(Self::get(*key)),
                None => Err(CommandError::Usage {
                    usage: "get-item <key>",
                }),
            },
            CommandType::Delete => match args.first() {
                Some(key) => Ok(Self::delete(*key)),
                None => Err(CommandError::Usage {
                    usage: "delete-item <key>",
                }),
            },
            CommandType::GetAll if args.is_empty() => Ok(Self::get_all()),
            CommandType::GetAll => Err(CommandError::Usage {
                usage: "get-all-items",
            }),
            CommandType::Unrecognized(_) => Err(CommandError::Usage { usage: USAGE }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_body() {
        let cmd = Command::decode(r#"{"type":"add-item","key":"a","value":"1","id":"x-1"}"#)
            .unwrap();
        assert_eq!(cmd.kind, CommandType::Add);
        assert_eq!(cmd.key, "a");
        assert_eq!(cmd.value, "1");
        assert_eq!(cmd.id, "x-1");
    }

    #[test]
    fn missing_optional_fields_default_to_empty() {
        let cmd = Command::decode(r#"{"type":"get-all-items"}"#).unwrap();
        assert_eq!(cmd.kind, CommandType::GetAll);
        assert!(cmd.key.is_empty());
        assert!(cmd.value.is_empty());
        assert!(cmd.id.is_empty());
    }

    #[test]
    fn unknown_type_is_kept_verbatim() {
        let cmd = Command::decode(r#"{"type":"explode","key":"a"}"#).unwrap();
        assert_eq!(cmd.kind, CommandType::Unrecognized("explode".to_string()));
        assert_eq!(cmd.kind.to_string(), "explode");
        assert_eq!(cmd.encode().unwrap(), r#"{"type":"explode","key":"a"}"#);
    }

    #[test]
    fn invalid_bodies_fail_to_decode() {
        assert!(matches!(
            Command::decode("not json"),
            Err(CommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(r#"{"key":"a"}"#),
            Err(CommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(r#"{"type":7}"#),
            Err(CommandError::Decode(_))
        ));
    }

    #[test]
    fn encode_omits_empty_fields() {
        let cmd = Command {
            kind: CommandType::Delete,
            key: "k".to_string(),
            value: String::new(),
            id: String::new(),
        };
        assert_eq!(cmd.encode().unwrap(), r#"{"type":"delete-item","key":"k"}"#);
    }

    #[test]
    fn constructors_assign_distinct_ids() {
        let a = Command::add("k", "v");
        let b = Command::add("k", "v");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(Command::decode(&a.encode().unwrap()).unwrap(), a);
    }

    #[test]
    fn parses_text_commands() {
        let add = Command::parse_text("add-item color blue").unwrap();
        assert_eq!((add.kind, add.key.as_str(), add.value.as_str()), (CommandType::Add, "color", "blue"));

        let get = Command::parse_text("  get-item color ").unwrap();
        assert_eq!(get.kind, CommandType::Get);
        assert_eq!(get.key, "color");

        let del = Command::parse_text("delete-item color").unwrap();
        assert_eq!(del.kind, CommandType::Delete);

        let all = Command::parse_text("get-all-items").unwrap();
        assert_eq!(all.kind, CommandType::GetAll);
    }

    #[test]
    fn rejects_bad_text_commands() {
        assert!(matches!(Command::parse_text("   "), Err(CommandError::Empty)));
        assert!(matches!(
            Command::parse_text("add-item onlykey"),
            Err(CommandError::Usage { usage: "add-item <key> <value>" })
        ));
        assert!(matches!(
            Command::parse_text("get-item"),
            Err(CommandError::Usage { .. })
        ));
        assert!(matches!(
            Command::parse_text("get-all-items extra"),
            Err(CommandError::Usage { usage: "get-all-items" })
        ));
        assert!(matches!(
            Command::parse_text("frobnicate x"),
            Err(CommandError::Usage { usage: USAGE })
        ));
    }
}
