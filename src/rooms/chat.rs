use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::{
    db,
    group::{ChatEvent, Groups},
};

use super::msg::{self, NewMessage};

#[derive(Debug, Deserialize)]
struct Inbound {
    message: String,
    username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("user {0} does not exist")]
    UserNotFound(String),
    #[error("room {0} does not exist")]
    RoomNotFound(i64),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChatError {
    /// The reply sent to the offending socket only.
    pub fn payload(&self) -> String {
        let error = match self {
            ChatError::UserNotFound(_) => "User not found",
            ChatError::RoomNotFound(_) => "Room not found",
            ChatError::Malformed(_) | ChatError::Database(_) => "Failed to send message",
        };
        serde_json::json!({ "error": error }).to_string()
    }
}

/// Persists one inbound `{message, username}` payload for `room_id` and
/// publishes it to the room's group.
pub async fn receive(db_pool: &SqlitePool, groups: &Groups, room_id: i64, text: &str) -> Result<ChatEvent, ChatError> {
    let result = persist_and_publish(db_pool, groups, room_id, text).await;
    if let Err(err) = &result {
        error!(room_id, %err, "chat message rejected");
    }
    result
}

async fn persist_and_publish(
    db_pool: &SqlitePool,
    groups: &Groups,
    room_id: i64,
    text: &str,
) -> Result<ChatEvent, ChatError> {
    let Inbound { message, username } = serde_json::from_str(text)?;
    info!(room_id, %username, "chat message received");

    let user = db::user_by_username(db_pool, &username)
        .await?
        .ok_or_else(|| ChatError::UserNotFound(username.clone()))?;
    let room = db::room_by_id(db_pool, room_id)
        .await?
        .ok_or(ChatError::RoomNotFound(room_id))?;

    let persisted = msg::insert_message(
        db_pool,
        NewMessage {
            room_id: room.id,
            user_id: user.id,
            body: &message,
            parent_id: None,
            attachment: None,
        },
    )
    .await?;

    let event = ChatEvent {
        message,
        username: user.username,
        created: persisted.created,
        message_id: persisted.id,
        user_id: user.id,
    };
    groups.publish(room_id, event.clone());
    Ok(event)
}
