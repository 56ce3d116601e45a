pub mod appresult;
pub mod attachments;
pub mod config;
pub mod db;
pub mod group;
pub mod index;
pub mod moderation;
pub mod profiles;
pub mod rooms;
pub mod session;
pub mod votes;

#[cfg(test)]
mod testutil;

use axum::{extract::FromRef, routing::post, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};
use group::Groups;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub groups: Groups,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vote/{id}", post(votes::vote_message))
        .merge(index::router())
        .merge(rooms::router())
        .merge(moderation::router())
        .merge(profiles::router())
}

/// The full service with tracing and cookie sessions applied.
pub fn app(app_state: AppState, session_inactivity: time::Duration) -> Router {
    serve(router(), app_state, session_inactivity)
}

fn serve(router: Router<AppState>, app_state: AppState, session_inactivity: time::Duration) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(session_inactivity));

    router
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}
