//! Message model
//!
//! Every transport carries the same JSON object:
//!
//! ```text
//! {"module": "lan", "kind": "request", "action": "get_settings", "data": {...}}
//! ```
//!
//! `data` is optional. Request/reply pairs are correlated by the transport,
//! never by message contents.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Reply,
    Notification,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Reply => "reply",
            MessageKind::Notification => "notification",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "request" => Ok(MessageKind::Request),
            "reply" => Ok(MessageKind::Reply),
            "notification" => Ok(MessageKind::Notification),
            other => Err(Error::Decode(format!("unknown message kind: {}", other))),
        }
    }
}

/// A wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub module: String,
    pub kind: MessageKind,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    pub fn new(
        module: impl Into<String>,
        kind: MessageKind,
        action: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            module: module.into(),
            kind,
            action: action.into(),
            data,
        }
    }

    pub fn request(module: impl Into<String>, action: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(module, MessageKind::Request, action, data)
    }

    pub fn reply(module: impl Into<String>, action: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(module, MessageKind::Reply, action, data)
    }

    pub fn notification(
        module: impl Into<String>,
        action: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self::new(module, MessageKind::Notification, action, data)
    }

    /// Reply carrying `data.errors`
    pub fn error_reply<I, S>(module: impl Into<String>, action: impl Into<String>, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let errors: Vec<String> = errors.into_iter().map(Into::into).collect();
        Self::reply(module, action, Some(json!({ "errors": errors })))
    }

    /// The `data.errors` list, if this is an error reply
    pub fn errors(&self) -> Option<Vec<&str>> {
        self.data
            .as_ref()?
            .get("errors")?
            .as_array()
            .map(|errors| errors.iter().filter_map(Value::as_str).collect())
    }

    pub fn is_error(&self) -> bool {
        self.errors().is_some()
    }

    pub fn to_value(&self) -> Value {
        // Serializing a struct of strings and JSON values cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::from)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}
