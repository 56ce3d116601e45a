//! Request identity.
//!
//! The login flow that writes [`USER_ID`] into the session lives outside this
//! service; everything here only reads it.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tower_sessions::Session;

use crate::{db, AppError};

pub const USER_ID: &str = "user_id";

/// The logged-in, non-suspended requester.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub db::User);

/// Like [`CurrentUser`] but anonymous requests pass through as `None`.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<db::User>);

/// A [`CurrentUser`] holding moderator privileges.
#[derive(Debug, Clone)]
pub struct Moderator(pub db::User);

async fn session_user<S>(parts: &mut Parts, state: &S) -> Result<Option<db::User>, AppError>
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, msg)| anyhow::anyhow!(msg))?;

    let Some(user_id) = session.get::<i64>(USER_ID).await? else {
        return Ok(None);
    };

    let db_pool = SqlitePool::from_ref(state);
    let Some(user) = db::user_by_id(&db_pool, user_id).await? else {
        // the account was deleted under a live session
        session.flush().await?;
        return Ok(None);
    };

    let profile = db::profile_for(&db_pool, user.id).await?;
    if let Some(until) = profile.suspended_at(OffsetDateTime::now_utc()) {
        return Err(AppError::Suspended { until });
    }

    Ok(Some(user))
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        session_user(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated)
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(session_user(parts, state).await?))
    }
}

impl<S> FromRequestParts<S> for Moderator
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_moderator {
            return Err(AppError::forbidden("Moderator privileges required"));
        }
        Ok(Moderator(user))
    }
}
