//! Handler and decode error types.

/// Why a command handler could not produce a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// The envelope carried neither `action` nor `type`
    MissingAction,
    /// No handler is registered for the action
    UnknownAction,
    /// Action-specific fields were missing or had the wrong shape
    InvalidParams,
    /// The handler ran and reported a failure
    Failed,
    /// The handler panicked; the receive loop caught it
    Panicked,
}

impl HandlerErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAction => "missing_action",
            Self::UnknownAction => "unknown_action",
            Self::InvalidParams => "invalid_params",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
        }
    }
}

/// A handler failure. Surfaces on the wire as `status = "error"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_action() -> Self {
        Self::new(HandlerErrorKind::MissingAction, "missing action")
    }

    pub fn unknown_action(action: &str) -> Self {
        Self::new(HandlerErrorKind::UnknownAction, format!("unknown action: {action}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::InvalidParams, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Failed, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Panicked, message)
    }
}

/// A frame that could not be decoded into an envelope at all.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,
}
