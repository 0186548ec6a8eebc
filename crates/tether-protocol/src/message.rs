//! Command and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::names::Actions;

/// An inbound command, decoded from one frame.
///
/// `action` comes from the `action` field, or `type` when `action` is absent.
/// Everything else the envelope carried stays in `fields` untouched; the core
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandMessage {
    pub action: Option<String>,
    pub sender: Option<String>,
    pub fields: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    /// The heartbeat payload: `{"action":"ping"}`.
    pub fn ping() -> Self {
        Self::new(Actions::PING)
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Encode back to a wire frame.
    pub fn to_frame(&self) -> String {
        let mut map = self.fields.clone();
        if let Some(action) = &self.action {
            map.insert("action".into(), Value::String(action.clone()));
        }
        if let Some(sender) = &self.sender {
            map.insert("sender".into(), Value::String(sender.clone()));
        }
        Value::Object(map).to_string()
    }
}

/// What a handler produced for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub status: String,
    pub result: Map<String, Value>,
}

impl CommandOutcome {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            result: Map::new(),
        }
    }

    /// Attach an opaque result field to the response.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.result.insert(name.into(), value);
        self
    }
}

/// Result returned by every command handler.
pub type HandlerResult = Result<CommandOutcome, HandlerError>;

/// Outbound response, sent once per handled command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub result: Map<String, Value>,
}

impl CommandResponse {
    /// A response echoing the request's action and sender.
    pub fn reply_to(command: &CommandMessage, status: impl Into<String>) -> Self {
        Self {
            action: command.action.clone(),
            status: status.into(),
            target: command.sender.clone(),
            error: None,
            result: Map::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == crate::names::Status::ERROR
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
