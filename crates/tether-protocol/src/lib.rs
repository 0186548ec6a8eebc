//! Tether - Protocol Types
//!
//! JSON wire types shared by the agent and the relay. Every frame is a
//! single UTF-8 JSON object. This crate owns the command envelope, the
//! response envelope, handler outcomes, and the pure decode pipeline
//! that turns a raw frame into something the receive loop can act on.

pub mod envelope;
pub mod error;
pub mod message;
pub mod names;

pub use envelope::{BodyUnwrap, Decoded, Envelope, decode_envelope};
pub use error::{DecodeError, HandlerError, HandlerErrorKind};
pub use message::{CommandMessage, CommandOutcome, CommandResponse, HandlerResult};
pub use names::{Actions, Status};
