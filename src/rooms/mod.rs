pub mod chat;
mod join;
pub(crate) mod msg;
mod new;
mod room;
mod study;
mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::{db::StudyType, AppState};

pub use join::{join_private_room, INVALID_ROOM_CREDENTIALS};
pub use new::{create_room, delete_room, update_room, CreatedRoom, RoomForm};
pub use study::{end_session, ensure_open_session};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-room", post(new::create_room_handler))
        .route("/update-room/{id}", post(new::update_room_handler))
        .route("/delete-room/{id}", post(new::delete_room_handler))
        .route(
            "/join-private-room",
            get(join::join_private_room_prompt).post(join::join_private_room_handler),
        )
        .route("/room/{id}", get(room::room).post(room::post_message))
        .route("/room/{id}/data", get(room::room_data))
        .route("/room/{id}/session/end", post(study::end_session_handler))
        .route("/room/{id}/ws", get(ws::room_ws))
        .route("/delete-message/{id}", post(msg::delete_message_handler))
}

#[derive(Debug, Serialize, FromRow)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub topic: Option<String>,
    pub host: Option<String>,
    pub study_type: StudyType,
    pub max_participants: i64,
    pub participant_count: i64,
    pub is_private: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SummaryFilter<'a> {
    pub(crate) public_only: bool,
    pub(crate) host_id: Option<i64>,
    pub(crate) topic_q: &'a str,
    pub(crate) name_q: &'a str,
}

pub(crate) fn like_pattern(q: &str) -> String {
    format!("%{}%", q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"))
}

pub(crate) async fn summaries(db_pool: &SqlitePool, filter: SummaryFilter<'_>) -> sqlx::Result<Vec<RoomSummary>> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT r.id, r.name, r.description, t.name AS topic, u.username AS host, \
                r.study_type, r.max_participants, r.is_private, \
                (SELECT COUNT(*) FROM room_participants p WHERE p.room_id=r.id) AS participant_count \
         FROM rooms r \
         LEFT JOIN topics t ON t.id=r.topic_id \
         LEFT JOIN users u ON u.id=r.host_id \
         WHERE 1=1",
    );

    if filter.public_only {
        qb.push(" AND r.is_private=0");
    }
    if let Some(host_id) = filter.host_id {
        qb.push(" AND r.host_id=").push_bind(host_id);
    }
    if !filter.topic_q.is_empty() {
        qb.push(" AND t.name LIKE ")
            .push_bind(like_pattern(filter.topic_q))
            .push(" ESCAPE '\\'");
    }
    if !filter.name_q.is_empty() {
        qb.push(" AND r.name LIKE ")
            .push_bind(like_pattern(filter.name_q))
            .push(" ESCAPE '\\'");
    }
    qb.push(" ORDER BY r.updated DESC, r.id DESC");

    qb.build_query_as().fetch_all(db_pool).await
}
