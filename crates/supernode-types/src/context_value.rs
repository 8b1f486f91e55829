//! The tagged variant backing `Context` entries, replacing an ad-hoc
//! any-typed map with the concrete categories the
//! core actually stores.

use std::fmt;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ContextValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    /// An opaque, task-owned payload that doesn't fit the above categories.
    /// Carried as pre-serialized JSON so the store stays `Send`/`Sync`
    /// without a trait-object `Any`.
    Payload(serde_json::Value),
}

impl ContextValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Payload(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Payload(_) => "payload",
        }
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Payload(v) => write!(f, "{v}"),
        }
    }
}
