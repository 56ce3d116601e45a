use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::group::Groups;

use super::chat;

/// Live chat for one room.
///
/// NOTE: the socket is accepted without checking that the requester may see
/// the room; private rooms are only guarded on the HTTP side.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
    State(groups): State<Groups>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, room_id, db_pool, groups))
}

async fn serve_socket(socket: WebSocket, room_id: i64, db_pool: SqlitePool, groups: Groups) {
    let conn_id = Uuid::now_v7();
    let mut subscription = groups.subscribe(room_id);
    info!(%conn_id, room_id = subscription.room_id(), "socket connected");

    let (mut sender, mut receiver) = socket.split();
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<String>();

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = subscription.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(%conn_id, %err, "failed to encode chat event");
                            continue;
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%conn_id, skipped, "socket lagging behind its room");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(text) = direct_rx.recv() => text,
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(err) = chat::receive(&db_pool, &groups, room_id, text.as_str()).await {
                        let _ = direct_tx.send(err.payload());
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    info!(%conn_id, room_id, "socket disconnected");
}
