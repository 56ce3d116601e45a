use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    db::{self, Profile, User},
    index::{self, Activity},
    rooms::{self, RoomSummary, SummaryFilter},
    AppError, AppResult,
};

#[derive(Debug, Serialize)]
pub struct ProfilePage {
    pub user: User,
    pub profile: Profile,
    pub rooms: Vec<RoomSummary>,
    pub room_messages: Vec<Activity>,
    pub total_likes: i64,
    pub is_suspended: bool,
}

pub async fn profile_page(db_pool: &SqlitePool, user_id: i64) -> AppResult<ProfilePage> {
    let user = db::user_by_id(db_pool, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let profile = db::profile_for(db_pool, user.id).await?;

    let rooms = rooms::summaries(
        db_pool,
        SummaryFilter {
            host_id: Some(user.id),
            public_only: true,
            ..Default::default()
        },
    )
    .await?;
    let room_messages = index::recent_activity(db_pool, Some(user.id)).await?;

    let total_likes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM votes v JOIN messages m ON m.id=v.message_id WHERE m.user_id=? AND v.vote_type='like'",
    )
    .bind(user.id)
    .fetch_one(db_pool)
    .await?;

    Ok(ProfilePage {
        is_suspended: profile.suspended_at(OffsetDateTime::now_utc()).is_some(),
        user,
        profile,
        rooms,
        room_messages,
        total_likes,
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn profile(State(db_pool): State<SqlitePool>, Path(user_id): Path<i64>) -> AppResult<Json<ProfilePage>> {
    Ok(Json(profile_page(&db_pool, user_id).await?))
}
