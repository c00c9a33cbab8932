//! Per-connection task: handshake, writer, and reader loop.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Receive the opening frame → bind an identity through the core
//!   2. Spawn a writer task draining the connection's outbox
//!   3. Loop: receive frames → normalize → dispatch, one at a time
//!
//! Frames from one connection are dispatched in the order they arrive:
//! the reader awaits each dispatch before reading the next frame.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_protocol::{
    ClientId, Codec, DispatchContext, JsonCodec, ProtocolError, Receiver, SequenceId, normalize,
};
use switchboard_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;

use crate::notifier::Notification;
use crate::{BrokerConfig, BrokerHandle, SwitchboardError};

/// Drop guard that unbinds the connection when the task exits.
///
/// This ensures cleanup happens even if the task panics. Since `Drop`
/// is synchronous, the disconnect is sent from a fire-and-forget task.
struct ConnectionGuard {
    connection: ConnectionId,
    broker: BrokerHandle,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let connection = self.connection;
        let broker = self.broker.clone();
        tokio::spawn(async move {
            let _ = broker.disconnect(connection).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    broker: BrokerHandle,
    config: Arc<BrokerConfig>,
) -> Result<(), SwitchboardError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let requested = read_handshake(&conn, config.handshake_timeout).await?;

    let (outbox, mut outbound) = mpsc::unbounded_channel();
    let outcome = broker.connect(conn_id, outbox, &requested).await?;
    let identity = outcome.identity;
    let _guard = ConnectionGuard {
        connection: conn_id,
        broker: broker.clone(),
    };
    tracing::info!(%conn_id, %identity, "client connected");

    // --- Step 2: Writer ---
    let writer_conn = Arc::clone(&conn);
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let bytes = match JsonCodec.encode(&envelope) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(%conn_id, error = %e, "failed to encode envelope");
                    continue;
                }
            };
            if let Err(e) = writer_conn.send(&bytes).await {
                tracing::debug!(%conn_id, error = %e, "send failed, stopping writer");
                break;
            }
        }
    });

    // --- Step 3: Reader ---
    loop {
        let received = match config.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, conn.recv()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::info!(%identity, "connection idle, closing");
                    break;
                }
            },
            None => conn.recv().await,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::info!(%identity, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%identity, error = %e, "recv error");
                break;
            }
        };

        match normalize(data.as_slice(), &identity, false) {
            Ok(envelope) => {
                broker.dispatch(envelope).await?;
            }
            Err(e) => report_protocol_error(&broker, &identity, &data, &e).await?,
        }
    }

    writer.abort();
    let _ = conn.close().await;
    // _guard drops here → disconnect fires.
    Ok(())
}

/// Waits for the opening frame and returns the requested identity
/// (empty when none was given).
async fn read_handshake(
    conn: &WebSocketConnection,
    timeout: Duration,
) -> Result<String, SwitchboardError> {
    let data = match tokio::time::timeout(timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(SwitchboardError::Handshake(
                "connection closed before handshake".into(),
            ));
        }
        Ok(Err(e)) => return Err(SwitchboardError::Transport(e)),
        Err(_) => {
            let _ = conn.close().await;
            return Err(SwitchboardError::Handshake("handshake timed out".into()));
        }
    };

    requested_identity(&data)
}

/// Pulls the requested identity out of an opening frame.
///
/// The frame must be a JSON object. Its `identity` key is optional; any
/// other key is ignored.
fn requested_identity(data: &[u8]) -> Result<String, SwitchboardError> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| SwitchboardError::Protocol(ProtocolError::MalformedMessage(e.to_string())))?;
    match value {
        Value::Object(fields) => match fields.get("identity") {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(id)) => Ok(id.clone()),
            Some(other) => Err(SwitchboardError::Protocol(ProtocolError::InvalidFormat {
                key: "identity",
                reason: format!("expected a string, got {other}"),
            })),
        },
        _ => Err(SwitchboardError::Handshake(
            "opening frame must be a JSON object".into(),
        )),
    }
}

/// Tells the sender why their message was dropped. The notification
/// carries the message's sequence-id when one can be read from it.
async fn report_protocol_error(
    broker: &BrokerHandle,
    identity: &ClientId,
    data: &[u8],
    error: &ProtocolError,
) -> Result<(), SwitchboardError> {
    tracing::debug!(%identity, code = error.code(), error = %error, "message dropped");

    let ctx = DispatchContext::new(identity.clone(), "", salvage_sequence(data));
    broker
        .notify(
            ctx,
            Notification::error(error.code())
                .to(Receiver::Client(identity.clone()))
                .param("error", error.to_string())
                .no_log(),
        )
        .await?;
    Ok(())
}

fn salvage_sequence(data: &[u8]) -> SequenceId {
    serde_json::from_slice::<Value>(data)
        .ok()
        .and_then(|v| v.get("sequence-id").and_then(Value::as_i64))
        .map_or(SequenceId::None, SequenceId::Id)
}
