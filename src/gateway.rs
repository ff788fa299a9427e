//! The live channel: one WebSocket per client at `GET /ws`.
//!
//! Each connection runs a reader loop on its own task and a writer task that
//! drains the connection's outbox, so a peer that stops reading only ever
//! backs up its own queue.

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_sessions::Session;
use tracing::{debug, error, warn};

use crate::{
    AppResult, AppState,
    events::{ClientEvent, ServerEvent},
    presence::Presence,
    registry::{ConnectionId, Identity},
    router::MessageRouter,
    session,
};

#[debug_handler(state = AppState)]
pub async fn live_channel(
    State(presence): State<Presence>,
    State(router): State<MessageRouter>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let identity = session::require_identity(&session).await?;
    Ok(ws.on_upgrade(move |socket| run_connection(socket, identity, presence, router)))
}

/// Leaves the room when the connection task ends, however it ends.
struct ConnectionGuard {
    presence: Presence,
    conn: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.presence.leave(self.conn);
        debug!("{} closed", self.conn);
    }
}

async fn run_connection(socket: WebSocket, identity: Identity, presence: Presence, router: MessageRouter) {
    let conn = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();

    let username = identity.username.clone();
    if let Err(err) = presence.join(conn, identity, outbox) {
        warn!("{conn} could not join: {err}");
        return;
    }
    debug!("{conn} opened by @{username}");
    let guard = ConnectionGuard { presence: presence.clone(), conn };

    let mut writer = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    error!("could not encode {event:?}: {err}");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&router, conn, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!("{conn} transport error: {err}");
                break;
            }
        }
    }

    drop(guard);
    if tokio::time::timeout(std::time::Duration::from_secs(1), &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn handle_frame(router: &MessageRouter, conn: ConnectionId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            debug!("{conn} sent a malformed frame: {err}");
            return;
        }
    };

    match router.dispatch(conn, event).await {
        Ok(delivered) => debug!("{conn} event queued on {delivered} connections"),
        Err(err) if err.is_silent() => debug!("{conn} event dropped: {err}"),
        Err(err) => error!("{conn} event failed: {err}"),
    }
}
