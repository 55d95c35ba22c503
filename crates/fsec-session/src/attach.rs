//! Tunnel attach prelude.
//!
//! One text WebSocket message pairing the endpoint with its peer at the
//! rendezvous, sent before any binary handshake frame.  Rejection arrives
//! as a close frame whose reason string is a stable token; classification
//! of those tokens lives in [`crate::error`].

use tokio_util::sync::CancellationToken;
use tracing::debug;

use fsec_channel::{Message, Transport, TransportError};
use fsec_wire::{Attach, AttachReason};

use crate::error::{Error, ErrorCode, Path, Stage};

pub(crate) async fn send_attach<T: Transport>(
    transport: &mut T,
    attach: &Attach,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let json = serde_json::to_string(attach).map_err(|e| {
        Error::new(Path::Tunnel, Stage::Attach, ErrorCode::Attach(AttachReason::InvalidAttach))
            .with_cause(e)
    })?;
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(Error::new(Path::Tunnel, Stage::Attach, ErrorCode::Canceled));
        }
        result = transport.write_message(Message::Text(json)) => result,
    };
    match result {
        Ok(()) => {
            debug!(
                channel_id = %attach.channel_id,
                role = %attach.role,
                endpoint_instance_id = %attach.endpoint_instance_id,
                "attach sent"
            );
            Ok(())
        }
        Err(TransportError::Canceled) => {
            Err(Error::new(Path::Tunnel, Stage::Attach, ErrorCode::Canceled))
        }
        Err(e) => {
            let code = e
                .close_reason()
                .and_then(AttachReason::from_token)
                .map_or(ErrorCode::Attach(AttachReason::AttachFailed), ErrorCode::Attach);
            Err(Error::new(Path::Tunnel, Stage::Attach, code).with_cause(e))
        }
    }
}
