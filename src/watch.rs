use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMsg};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    bus::{ClientFrame, ServerEvent},
    errors::ClientError,
    orders::{OrderId, UserId},
};

/// Connects to `/ws`, joins the order's tracking channel and prints every
/// event as one JSON line until cancelled or the server hangs up.
pub async fn run_watch(
    ws_base: &str,
    token: UserId,
    order_id: OrderId,
    cancel_token: CancellationToken,
) -> Result<(), ClientError> {
    let url = format!("{}/ws?token={}", ws_base.trim_end_matches('/'), token);
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| ClientError::Connect(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let join = serde_json::to_string(&ClientFrame::JoinOrderTracking { order_id })
        .map_err(|e| ClientError::Connect(e.to_string()))?;
    write
        .send(WsMsg::Text(join.into()))
        .await
        .map_err(|e| ClientError::Connect(e.to_string()))?;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            msg = read.next() => match msg {
                Some(Ok(WsMsg::Text(txt))) => match serde_json::from_str::<ServerEvent>(txt.as_str()) {
                    Ok(ServerEvent::Error { kind, message }) => {
                        return Err(ClientError::Rejected(format!("{}: {}", kind, message)));
                    }
                    Ok(_) => println!("{}", txt.as_str()),
                    Err(e) => warn!(error = %e, "skipping unparseable frame"),
                },
                Some(Ok(WsMsg::Close(_))) | None => break,
                Some(Err(e)) => return Err(ClientError::Connect(e.to_string())),
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = write.send(WsMsg::Close(None)).await;
    Ok(())
}
