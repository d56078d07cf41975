use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::Gateway;
use crate::handshake::{HandshakeParams, authorize};
use crate::registry::{ConnectionId, ConnectionRegistry, LiveConnection};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Run one realtime connection from upgrade to close.
///
/// The handshake runs first; any failure closes the socket without a
/// payload. A connection that passes is registered for its conversation and
/// deregistered exactly once when the socket goes away, whoever closed it.
pub async fn handle_connection(
    mut socket: WebSocket,
    gateway: Gateway,
    header_token: Option<String>,
    params: HandshakeParams,
) {
    let peer = match authorize(
        gateway.store(),
        gateway.jwt_secret(),
        header_token.as_deref(),
        &params,
    )
    .await
    {
        Ok(peer) => peer,
        Err(rejection) => {
            debug!("Realtime handshake rejected: {}", rejection);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (conn, outbound) = LiveConnection::new(peer.user_id, peer.conversation_id);
    let registration = Registration::register(gateway.registry().clone(), conn).await;

    info!(
        "{} ({}) connected to conversation {}",
        peer.username, peer.user_id, peer.conversation_id
    );

    run_connection_loop(socket, outbound, peer.user_id).await;

    registration.release().await;
    info!(
        "{} ({}) disconnected from conversation {}",
        peer.username, peer.user_id, peer.conversation_id
    );
}

/// A registry entry owned by one connection task. `release` consumes it, so
/// the entry is removed at most once per connection. If the owning task is
/// dropped before releasing (aborted, panicked), `Drop` removes the entry.
pub(crate) struct Registration {
    registry: ConnectionRegistry,
    conversation_id: Uuid,
    id: ConnectionId,
    released: bool,
}

impl Registration {
    pub(crate) async fn register(registry: ConnectionRegistry, conn: LiveConnection) -> Self {
        let conversation_id = conn.conversation_id;
        let id = conn.id;
        registry.add(conn).await;
        Self {
            registry,
            conversation_id,
            id,
            released: false,
        }
    }

    /// Returns `false` if the entry was already gone (e.g. drained at shutdown).
    pub(crate) async fn release(mut self) -> bool {
        let removed = self.registry.remove(self.conversation_id, self.id).await;
        self.released = true;
        removed
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let registry = self.registry.clone();
        let (conversation_id, id) = (self.conversation_id, self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.remove(conversation_id, id).await;
                });
            }
            Err(_) => warn!(
                "Connection {} on conversation {} dropped outside a runtime, entry not removed",
                id, conversation_id
            ),
        }
    }
}

/// Pump queued events out to the socket and watch the socket for close.
/// Returns once either side is done.
async fn run_connection_loop(
    socket: WebSocket,
    mut outbound: mpsc::UnboundedReceiver<Utf8Bytes>,
    user_id: Uuid,
) {
    let (mut sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        // Registry dropped us (server shutdown)
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The realtime channel is push-only; inbound frames only matter for
    // liveness and close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    trace!("Ignoring {}-byte text frame from {}", text.as_str().len(), user_id);
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
