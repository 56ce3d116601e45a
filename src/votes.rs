use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{rooms::msg, session::CurrentUser, AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum VoteType {
    Like,
    Dislike,
}

impl VoteType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "like" => Some(VoteType::Like),
            "dislike" => Some(VoteType::Dislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Added,
    Changed,
    Removed,
}

/// Next stored vote for a (user, message) pair when `requested` is submitted.
pub fn transition(current: Option<VoteType>, requested: VoteType) -> (Option<VoteType>, VoteAction) {
    match current {
        None => (Some(requested), VoteAction::Added),
        Some(current) if current == requested => (None, VoteAction::Removed),
        Some(_) => (Some(requested), VoteAction::Changed),
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub vote_type: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct VoteOutcome {
    pub action: VoteAction,
    pub vote_type: Option<VoteType>,
    pub like_count: i64,
    pub dislike_count: i64,
}

pub async fn cast_vote(
    db_pool: &SqlitePool,
    user_id: i64,
    message_id: i64,
    vote_type: Option<&str>,
) -> AppResult<VoteOutcome> {
    let message = msg::message_ref(db_pool, message_id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;

    if message.user_id == user_id {
        return Err(AppError::validation("You cannot vote on your own message"));
    }

    let requested = vote_type
        .and_then(VoteType::parse)
        .ok_or_else(|| AppError::validation("Invalid vote type"))?;

    let mut tx = db_pool.begin().await?;

    let current: Option<VoteType> = sqlx::query_scalar("SELECT vote_type FROM votes WHERE user_id=? AND message_id=?")
        .bind(user_id)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

    let (next, action) = transition(current, requested);
    match (action, next) {
        (VoteAction::Added, Some(vote_type)) => {
            sqlx::query("INSERT INTO votes (user_id,message_id,vote_type,created) VALUES (?,?,?,?)")
                .bind(user_id)
                .bind(message_id)
                .bind(vote_type)
                .bind(OffsetDateTime::now_utc())
                .execute(&mut *tx)
                .await?;
        }
        (VoteAction::Changed, Some(vote_type)) => {
            sqlx::query("UPDATE votes SET vote_type=? WHERE user_id=? AND message_id=?")
                .bind(vote_type)
                .bind(user_id)
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
        }
        _ => {
            sqlx::query("DELETE FROM votes WHERE user_id=? AND message_id=?")
                .bind(user_id)
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    let (like_count, dislike_count): (i64, i64) = sqlx::query_as(
        "SELECT \
            COALESCE(SUM(vote_type='like'),0), \
            COALESCE(SUM(vote_type='dislike'),0) \
         FROM votes WHERE message_id=?",
    )
    .bind(message_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(VoteOutcome {
        action,
        vote_type: next,
        like_count,
        dislike_count,
    })
}

#[debug_handler(state = crate::AppState)]
pub async fn vote_message(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<i64>,
    Json(VoteRequest { vote_type }): Json<VoteRequest>,
) -> AppResult<Json<VoteOutcome>> {
    Ok(Json(
        cast_vote(&db_pool, user.id, message_id, vote_type.as_deref()).await?,
    ))
}
