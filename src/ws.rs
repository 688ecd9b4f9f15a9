//! The real-time endpoint. A socket authenticates once at upgrade, is bound to
//! its user channel, and then multiplexes bus events out and tracking frames
//! in until either side goes away.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    auth::{bearer_token, resolve},
    bus::{BusError, Channel, ClientFrame, ConnectionId, ServerEvent},
    directory::User,
    errors::OrderError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Credentials are checked before the upgrade so an anonymous client gets a
/// plain 401 and never a socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, OrderError> {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(OrderError::NotAuthenticated)?;
    let user = resolve(state.directory.as_ref(), token)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

fn error_event(err: &OrderError) -> ServerEvent {
    ServerEvent::Error {
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let txt = match serde_json::to_string(event) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, event = event.name(), "failed to encode event");
            return Ok(());
        }
    };
    sender.send(Message::Text(txt.into())).await
}

async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let mut sub = match state.bus.connect(user.id) {
        Ok(s) => s,
        Err(e) => {
            debug!(user_id = %user.id, error = %e, "refusing socket");
            return;
        }
    };
    let conn = sub.id;
    info!(conn_id = conn, user_id = %user.id, role = %user.role, "socket connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = sub.events.recv() => match event {
                Some(ev) => {
                    if send_event(&mut sender, &ev).await.is_err() {
                        break;
                    }
                }
                // bus shut down
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&state, &user, conn, text.as_str()).await {
                        if send_event(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.bus.disconnect(conn);
    info!(conn_id = conn, "socket closed");
}

/// Applies one client frame. Returns an error frame to send back, if any.
async fn handle_frame(
    state: &AppState,
    user: &User,
    conn: ConnectionId,
    text: &str,
) -> Option<ServerEvent> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            return Some(error_event(&OrderError::Validation(format!(
                "unrecognised frame: {}",
                e
            ))));
        }
    };

    let result = match frame {
        ClientFrame::JoinOrderTracking { order_id } => {
            match state.service.authorize_tracking(user, order_id).await {
                Ok(()) => state
                    .bus
                    .join(conn, Channel::Order(order_id))
                    .map_err(bus_error),
                Err(e) => Err(e),
            }
        }
        ClientFrame::LeaveOrderTracking { order_id } => state
            .bus
            .leave(conn, Channel::Order(order_id))
            .map_err(bus_error),
    };
    result.err().map(|e| {
        debug!(conn_id = conn, error = %e, "frame refused");
        error_event(&e)
    })
}

fn bus_error(e: BusError) -> OrderError {
    match e {
        BusError::Closed | BusError::UnknownConnection(_) => OrderError::ServiceUnavailable,
        BusError::ForeignUserChannel => OrderError::NotAuthorized,
    }
}
