use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;

use crate::{db, session::CurrentUser, AppError, AppResult};

#[derive(Debug, FromRow)]
struct OpenSession {
    id: i64,
    start_time: OffsetDateTime,
}

/// Opens a study session for the pair unless one is already running.
pub async fn ensure_open_session(db_pool: &SqlitePool, user_id: i64, room_id: i64) -> sqlx::Result<()> {
    let open: Option<i64> =
        sqlx::query_scalar("SELECT id FROM study_sessions WHERE user_id=? AND room_id=? AND end_time IS NULL LIMIT 1")
            .bind(user_id)
            .bind(room_id)
            .fetch_optional(db_pool)
            .await?;

    if open.is_none() {
        sqlx::query("INSERT INTO study_sessions (user_id,room_id,start_time) VALUES (?,?,?)")
            .bind(user_id)
            .bind(room_id)
            .bind(OffsetDateTime::now_utc())
            .execute(db_pool)
            .await?;
        info!(user_id, room_id, "study session started");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct EndedSession {
    pub session_id: i64,
    pub hours: f64,
    pub total_study_hours: f64,
}

/// Closes the running session and credits its duration to the profile.
pub async fn end_session(db_pool: &SqlitePool, user_id: i64, room_id: i64) -> AppResult<EndedSession> {
    db::profile_for(db_pool, user_id).await?;
    let mut tx = db_pool.begin().await?;

    let session: OpenSession = sqlx::query_as(
        "SELECT id,start_time FROM study_sessions WHERE user_id=? AND room_id=? AND end_time IS NULL ORDER BY id LIMIT 1",
    )
    .bind(user_id)
    .bind(room_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Study session"))?;

    let end_time = OffsetDateTime::now_utc();
    let hours = ((end_time - session.start_time).as_seconds_f64() / 3600.0).max(0.0);

    sqlx::query("UPDATE study_sessions SET end_time=?,completed=1 WHERE id=?")
        .bind(end_time)
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

    let total_study_hours: f64 = sqlx::query_scalar(
        "UPDATE user_profiles SET total_study_hours=total_study_hours+? WHERE user_id=? RETURNING total_study_hours",
    )
    .bind(hours)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(user_id, room_id, hours, "study session ended");

    Ok(EndedSession {
        session_id: session.id,
        hours,
        total_study_hours,
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn end_session_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<i64>,
) -> AppResult<Json<EndedSession>> {
    Ok(Json(end_session(&db_pool, user.id, room_id).await?))
}
