use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    attachments::Attachment,
    session::CurrentUser,
    votes::VoteType,
    AppError, AppResult,
};

const EXCERPT_CHARS: usize = 80;

pub(crate) struct NewMessage<'a> {
    pub(crate) room_id: i64,
    pub(crate) user_id: i64,
    pub(crate) body: &'a str,
    pub(crate) parent_id: Option<i64>,
    pub(crate) attachment: Option<Attachment>,
}

#[derive(Debug)]
pub(crate) struct Persisted {
    pub(crate) id: i64,
    pub(crate) created: OffsetDateTime,
}

pub(crate) async fn insert_message(db_pool: &SqlitePool, new: NewMessage<'_>) -> sqlx::Result<Persisted> {
    let created = OffsetDateTime::now_utc();
    let (path, file_name, file_type) = match new.attachment {
        Some(Attachment { path, file_name, kind }) => (Some(path), Some(file_name), Some(kind.as_str())),
        None => (None, None, None),
    };

    let id = sqlx::query_scalar(
        "INSERT INTO messages (user_id,room_id,parent_id,body,file_attachment,file_name,file_type,created,updated) \
         VALUES (?,?,?,?,?,?,?,?,?) RETURNING id",
    )
    .bind(new.user_id)
    .bind(new.room_id)
    .bind(new.parent_id)
    .bind(new.body)
    .bind(path)
    .bind(file_name)
    .bind(file_type)
    .bind(created)
    .bind(created)
    .fetch_one(db_pool)
    .await?;

    info!(message_id = id, room_id = new.room_id, user_id = new.user_id, "message saved");
    Ok(Persisted { id, created })
}

/// A message row with everything a room listing needs.
#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    user_id: i64,
    username: String,
    body: String,
    created: OffsetDateTime,
    file_attachment: Option<String>,
    file_name: Option<String>,
    file_type: Option<String>,
    parent_id: Option<i64>,
    parent_username: Option<String>,
    parent_body: Option<String>,
    like_count: i64,
    dislike_count: i64,
    user_vote: Option<VoteType>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub username: String,
    pub user_id: i64,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub like_count: i64,
    pub dislike_count: i64,
    pub user_vote: Option<VoteType>,
    pub is_owner: bool,
    pub is_admin: bool,
    pub file_attachment: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub parent_id: Option<i64>,
    pub parent_username: Option<String>,
    pub parent_excerpt: Option<String>,
}

pub fn excerpt(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        head + "..."
    } else {
        head
    }
}

/// Messages of a room with id above `after_id`, oldest first. `viewer` decides
/// `user_vote`, `is_owner` and `is_admin`.
pub(crate) async fn list_messages(
    db_pool: &SqlitePool,
    room_id: i64,
    after_id: i64,
    viewer: Option<&crate::db::User>,
) -> sqlx::Result<Vec<MessageView>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT m.id, m.user_id, u.username, m.body, m.created, \
                m.file_attachment, m.file_name, m.file_type, m.parent_id, \
                pu.username AS parent_username, p.body AS parent_body, \
                (SELECT COUNT(*) FROM votes v WHERE v.message_id=m.id AND v.vote_type='like') AS like_count, \
                (SELECT COUNT(*) FROM votes v WHERE v.message_id=m.id AND v.vote_type='dislike') AS dislike_count, \
                (SELECT v.vote_type FROM votes v WHERE v.message_id=m.id AND v.user_id=?) AS user_vote \
         FROM messages m \
         JOIN users u ON u.id=m.user_id \
         LEFT JOIN messages p ON p.id=m.parent_id \
         LEFT JOIN users pu ON pu.id=p.user_id \
         WHERE m.room_id=? AND m.id>? \
         ORDER BY m.id",
    )
    .bind(viewer.map(|user| user.id))
    .bind(room_id)
    .bind(after_id)
    .fetch_all(db_pool)
    .await?;

    let is_admin = viewer.is_some_and(|user| user.is_moderator);
    Ok(rows
        .into_iter()
        .map(|row| MessageView {
            is_owner: viewer.is_some_and(|user| user.id == row.user_id),
            is_admin,
            parent_excerpt: row.parent_body.as_deref().map(excerpt),
            id: row.id,
            username: row.username,
            user_id: row.user_id,
            body: row.body,
            created: row.created,
            like_count: row.like_count,
            dislike_count: row.dislike_count,
            user_vote: row.user_vote,
            file_attachment: row.file_attachment,
            file_name: row.file_name,
            file_type: row.file_type,
            parent_id: row.parent_id,
            parent_username: row.parent_username,
        })
        .collect())
}

#[derive(Debug, FromRow)]
pub(crate) struct MessageRef {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) room_id: i64,
}

pub(crate) async fn message_ref(db_pool: &SqlitePool, message_id: i64) -> sqlx::Result<Option<MessageRef>> {
    sqlx::query_as("SELECT id,user_id,room_id FROM messages WHERE id=?")
        .bind(message_id)
        .fetch_optional(db_pool)
        .await
}

/// Votes go with the row; reports keep existing with a null message.
pub(crate) async fn delete_message(db_pool: &SqlitePool, message_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM messages WHERE id=?")
        .bind(message_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Serialize)]
pub(crate) struct DeletedMessage {
    status: &'static str,
    message_id: i64,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_message_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<i64>,
) -> AppResult<Json<DeletedMessage>> {
    let message = message_ref(&db_pool, message_id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;

    if message.user_id != user.id && !user.is_moderator {
        return Err(AppError::forbidden("You are not allowed here!"));
    }

    delete_message(&db_pool, message.id).await?;
    info!(message_id, room_id = message.room_id, by = user.id, "message deleted");

    Ok(Json(DeletedMessage {
        status: "success",
        message_id,
    }))
}
