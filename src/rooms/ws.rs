use std::fmt::Display;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, Path, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{auth, db::ChannelId};

use super::{
    frame::ServerFrame,
    gateway::{Gateway, GatewayError, Session},
    registry::SessionId,
};

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(channel_id): Path<ChannelId>,
    State(gateway): State<Gateway>,
    headers: HeaderMap,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = auth::bearer_token(&headers).map(str::to_owned);

    ws.on_upgrade(move |stream| serve_socket(gateway, channel_id, token, stream))
}

async fn serve_socket(gateway: Gateway, channel_id: ChannelId, token: Option<String>, stream: WebSocket) {
    let (session, rx) = gateway.open(channel_id, token.as_deref()).await;
    let (sender, receiver) = stream.split();

    let writer = tokio::spawn(write_frames(session.id(), rx, sender));
    pump(session, receiver, writer).await;
}

/// Drains the session's outbound queue into the socket until either side gives up.
async fn write_frames<S>(session_id: SessionId, mut rx: mpsc::Receiver<ServerFrame>, mut sender: S)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sender.send(Message::text(frame.to_json())).await {
            tracing::debug!(%session_id, error = %e, "socket write failed");
            break;
        }
    }
    let _ = sender.close().await;
}

/// Feeds inbound frames to `session` until the peer leaves or the writer
/// stops, then closes the session.
async fn pump<R, E>(session: Session, mut receiver: R, mut writer: JoinHandle<()>)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let session_id = session.id();
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Binary(_))) => session.report(GatewayError::Validation),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%session_id, error = %e, "socket read failed");
                    break;
                }
            },
            _ = &mut writer => {
                tracing::debug!(%session_id, "writer stopped");
                break;
            }
        }
    }

    session.close().await;
    writer.abort();
}
