//! Shared types for ConfigGate.
//!
//! These are used by the server and by the admin CLI. `ConfigValue` is the
//! typed form of a setting; everything below the settings gate only ever sees
//! its storage string plus the `ValueKind` tag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors when turning a stored string back into a typed value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueParseError {
    #[error("unknown value kind: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} value")]
    Invalid { kind: ValueKind },
}

/// Discriminant persisted next to every stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Str,
    StringList,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Str => "str",
            Self::StringList => "string_list",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValueParseError> {
        match s {
            "bool" => Ok(Self::Bool),
            "int" => Ok(Self::Int),
            "str" => Ok(Self::Str),
            "string_list" => Ok(Self::StringList),
            other => Err(ValueParseError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed configuration value.
///
/// Serialized untagged, so JSON `true`, `30`, `"smtp.example.org"` and
/// `["a", "b"]` map to the four variants directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    StringList(Vec<String>),
}

impl ConfigValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Str(_) => ValueKind::Str,
            Self::StringList(_) => ValueKind::StringList,
        }
    }

    /// String form handed to the cipher and the store.
    pub fn to_storage_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Str(s) => s.clone(),
            // Serializing a Vec<String> cannot fail.
            Self::StringList(items) => serde_json::to_string(items).unwrap_or_else(|_| "[]".into()),
        }
    }

    /// Inverse of [`ConfigValue::to_storage_string`].
    pub fn from_storage(kind: ValueKind, text: &str) -> Result<Self, ValueParseError> {
        let invalid = || ValueParseError::Invalid { kind };
        match kind {
            ValueKind::Bool => match text {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::Int => text.parse().map(Self::Int).map_err(|_| invalid()),
            ValueKind::Str => Ok(Self::Str(text.to_string())),
            ValueKind::StringList => serde_json::from_str(text)
                .map(Self::StringList)
                .map_err(|_| invalid()),
        }
    }

    /// Logical emptiness: the storage string is `""`.
    ///
    /// Only strings can be empty; an empty list still serializes to `[]`.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Str(s) if s.is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(items: Vec<String>) -> Self {
        Self::StringList(items)
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}
