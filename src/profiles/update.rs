use axum::{debug_handler, extract::State, response::Redirect, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;
use validator::Validate;

use crate::{
    attachments::avatar_path,
    db::{self, PreferredStudyTime},
    session::CurrentUser,
    AppResult,
};

/// Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    pub preferred_study_time: Option<PreferredStudyTime>,
    /// File name of an uploaded avatar.
    #[validate(length(min = 1, max = 255))]
    pub avatar: Option<String>,
}

pub async fn update_profile(db_pool: &SqlitePool, user_id: i64, update: ProfileUpdate) -> AppResult<db::Profile> {
    update.validate()?;
    db::profile_for(db_pool, user_id).await?;

    sqlx::query(
        "UPDATE user_profiles SET bio=COALESCE(?,bio), preferred_study_time=COALESCE(?,preferred_study_time), \
         avatar=COALESCE(?,avatar) WHERE user_id=?",
    )
    .bind(update.bio.as_deref().map(str::trim))
    .bind(update.preferred_study_time)
    .bind(update.avatar.as_deref().map(avatar_path))
    .bind(user_id)
    .execute(db_pool)
    .await?;

    info!(user_id, "profile updated");
    Ok(db::profile_for(db_pool, user_id).await?)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn update_user(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Redirect> {
    update_profile(&db_pool, user.id, update).await?;
    Ok(Redirect::to(&format!("/profile/{}", user.id)))
}
