//! The receive loop: one frame in, at most one response out.
//!
//! Frames are handled strictly in arrival order. The response to a command is
//! written before the next frame is read, so request/response pairing on a
//! connection is never reordered.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tether_protocol::{
    BodyUnwrap, CommandMessage, CommandResponse, Envelope, HandlerError, HandlerResult, Status,
    decode_envelope,
};
use tether_transport::{ConnectionInfo, Transport, TransportError};
use tracing::{debug, warn};

use crate::CommandHandler;

/// Consume frames from `conn` until the connection fails or closes.
///
/// Bad frames and handler failures never end the loop. Returns the error that
/// did.
pub async fn receive_loop<T, H>(conn: &T, handler: &H) -> TransportError
where
    T: Transport,
    H: CommandHandler,
{
    loop {
        let frame = match conn.receive().await {
            Ok(frame) => frame,
            Err(e) if !e.is_fatal() => {
                warn!("Dropping frame on {}: {e}", conn.id());
                continue;
            }
            Err(e) => {
                debug!("Receive loop on {} ending: {e}", conn.id());
                return e;
            }
        };

        debug!("Received on {}: {frame}", conn.id());

        let Some(response) = process_frame(&frame, conn.info(), handler).await else {
            continue;
        };

        let encoded = match response.to_frame() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode response on {}: {e}", conn.id());
                continue;
            }
        };

        match conn.send(encoded).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                warn!("Failed to send response on {}: {e}", conn.id());
                return e;
            }
            Err(e) => warn!("Response dropped on {}: {e}", conn.id()),
        }
    }
}

/// Decode one frame and run the handler for it.
///
/// Returns `None` for frames that get no response: malformed JSON,
/// authorization rejections, and responses relayed from other peers.
pub async fn process_frame<H: CommandHandler>(
    frame: &str,
    connection: &ConnectionInfo,
    handler: &H,
) -> Option<CommandResponse> {
    let decoded = match decode_envelope(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Invalid frame on {}: {e}", connection.id);
            return None;
        }
    };

    if let BodyUnwrap::Invalid(reason) = &decoded.body {
        debug!("Nested body not decodable ({reason}), using outer envelope");
    }

    let command = match decoded.envelope {
        Envelope::Command(command) => command,
        Envelope::Forbidden => {
            debug!("Ignoring authorization rejection on {}", connection.id);
            return None;
        }
        Envelope::PeerResponse { action, status } => {
            debug!(
                "Ignoring relayed response (action={}, status={status})",
                action.as_deref().unwrap_or("-")
            );
            return None;
        }
    };

    let result = AssertUnwindSafe(handler.handle(&command, connection))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::panicked(panic_message(panic.as_ref()))));

    Some(build_response(&command, result))
}

/// Turn a handler outcome into the wire response.
pub fn build_response(command: &CommandMessage, result: HandlerResult) -> CommandResponse {
    match result {
        Ok(outcome) => {
            let mut response = CommandResponse::reply_to(command, outcome.status);
            response.result = outcome.result;
            response
        }
        Err(error) => {
            warn!(
                "Command {} failed ({}): {}",
                command.action().unwrap_or("-"),
                error.kind.as_str(),
                error.message
            );
            let mut response = CommandResponse::reply_to(command, Status::ERROR);
            response.error = Some(error.message);
            response
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".into()
    }
}
