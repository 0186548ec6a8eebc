//! Two-stage envelope decoding.
//!
//! Stage one parses the outer frame. Stage two unwraps a `body` field that
//! holds a second JSON document as a string (the shape API gateways wrap
//! payloads in). A `body` that fails to decode is not an error: decoding
//! falls back to the outer envelope and reports what happened through
//! [`BodyUnwrap`] so the caller can log it.
//!
//! Pure: no I/O, no logging.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::message::CommandMessage;

/// What a decoded frame asks the receiver to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A command to hand to the command handler
    Command(CommandMessage),
    /// An authorization rejection (`"message": "Forbidden"`); dropped silently
    Forbidden,
    /// Another peer's response relayed back to us; never dispatched.
    ///
    /// Any string `status` marks a frame as a response, with or without
    /// `target`; untargeted heartbeat pongs must land here. Commands must not
    /// use a string `status` as an argument.
    PeerResponse {
        action: Option<String>,
        status: String,
    },
}

/// Outcome of the nested `body` unwrap stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyUnwrap {
    /// No string `body` field was present
    Absent,
    /// `body` decoded and replaced the outer envelope
    Unwrapped,
    /// `body` was present but not a JSON object; the outer envelope was kept
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub envelope: Envelope,
    pub body: BodyUnwrap,
}

/// Decode one inbound frame.
///
/// Fails only when the outer frame is not a JSON object. Unknown fields are
/// carried through, fields of the wrong type degrade to "absent".
/// A frame with a string `status` is always a [`Envelope::PeerResponse`].
pub fn decode_envelope(frame: &str) -> Result<Decoded, DecodeError> {
    let outer = match serde_json::from_str::<Value>(frame)? {
        Value::Object(map) => map,
        _ => return Err(DecodeError::NotAnObject),
    };

    if is_forbidden(&outer) {
        return Ok(Decoded {
            envelope: Envelope::Forbidden,
            body: BodyUnwrap::Absent,
        });
    }

    let (map, body) = unwrap_body(outer);

    if is_forbidden(&map) {
        return Ok(Decoded {
            envelope: Envelope::Forbidden,
            body,
        });
    }

    Ok(Decoded {
        envelope: classify(map),
        body,
    })
}

fn is_forbidden(map: &Map<String, Value>) -> bool {
    map.get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.eq_ignore_ascii_case("forbidden"))
}

fn unwrap_body(outer: Map<String, Value>) -> (Map<String, Value>, BodyUnwrap) {
    let Some(Value::String(raw)) = outer.get("body") else {
        return (outer, BodyUnwrap::Absent);
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(inner)) => (inner, BodyUnwrap::Unwrapped),
        Ok(_) => (outer, BodyUnwrap::Invalid("body is not a JSON object".into())),
        Err(e) => {
            let reason = e.to_string();
            (outer, BodyUnwrap::Invalid(reason))
        }
    }
}

fn classify(mut map: Map<String, Value>) -> Envelope {
    let action = take_action(&mut map);

    if let Some(status) = map.get("status").and_then(Value::as_str) {
        return Envelope::PeerResponse {
            action,
            status: status.to_string(),
        };
    }

    let sender = match map.remove("sender") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    Envelope::Command(CommandMessage {
        action,
        sender,
        fields: map,
    })
}

/// `action` wins over `type`; empty strings count as absent.
fn take_action(map: &mut Map<String, Value>) -> Option<String> {
    match map.remove("action") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s),
        _ => {}
    }
    match map.get("type") {
        Some(Value::String(s)) if !s.is_empty() => {
            let s = s.clone();
            map.remove("type");
            Some(s)
        }
        _ => None,
    }
}
