use axum::{
    debug_handler,
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

use crate::{
    rooms::{self, RoomSummary, SummaryFilter},
    session::CurrentUser,
    AppResult, AppState,
};

const HOME_TOPICS: i64 = 5;
const RECENT_MESSAGES: i64 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/rooms") }))
        .route("/rooms", get(home))
        .route("/topics", get(topics))
        .route("/activity/data", get(activity_data))
}

#[derive(Debug, Serialize, FromRow)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub room_count: i64,
}

/// A message as shown in activity feeds.
#[derive(Debug, Serialize, FromRow)]
pub struct Activity {
    pub id: i64,
    pub room_id: i64,
    pub room_name: String,
    pub user_id: i64,
    pub username: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

pub(crate) async fn topics_matching(db_pool: &SqlitePool, q: &str, limit: Option<i64>) -> sqlx::Result<Vec<Topic>> {
    sqlx::query_as(
        "SELECT t.id, t.name, (SELECT COUNT(*) FROM rooms r WHERE r.topic_id=t.id) AS room_count \
         FROM topics t \
         WHERE t.name<>'' AND t.name LIKE ? ESCAPE '\\' \
         ORDER BY t.id LIMIT ?",
    )
    .bind(rooms::like_pattern(q))
    .bind(limit.unwrap_or(-1))
    .fetch_all(db_pool)
    .await
}

/// Newest messages from public rooms, optionally by one author.
pub(crate) async fn recent_activity(db_pool: &SqlitePool, user_id: Option<i64>) -> sqlx::Result<Vec<Activity>> {
    sqlx::query_as(
        "SELECT m.id, m.room_id, r.name AS room_name, m.user_id, u.username, m.body, m.created \
         FROM messages m \
         JOIN rooms r ON r.id=m.room_id \
         JOIN users u ON u.id=m.user_id \
         WHERE r.is_private=0 AND (? IS NULL OR m.user_id=?) \
         ORDER BY m.id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(user_id)
    .bind(RECENT_MESSAGES)
    .fetch_all(db_pool)
    .await
}

#[derive(Debug, Default, Deserialize)]
struct HomeQuery {
    #[serde(default)]
    topic_q: String,
    #[serde(default)]
    name_q: String,
}

#[derive(Serialize)]
struct Home {
    rooms: Vec<RoomSummary>,
    topics: Vec<Topic>,
    room_count: usize,
    room_messages: Vec<Activity>,
}

#[debug_handler(state = crate::AppState)]
async fn home(
    State(db_pool): State<SqlitePool>,
    _: CurrentUser,
    Query(query): Query<HomeQuery>,
) -> AppResult<Json<Home>> {
    let rooms = rooms::summaries(
        &db_pool,
        SummaryFilter {
            public_only: true,
            topic_q: query.topic_q.trim(),
            name_q: query.name_q.trim(),
            ..Default::default()
        },
    )
    .await?;

    Ok(Json(Home {
        room_count: rooms.len(),
        rooms,
        topics: topics_matching(&db_pool, "", Some(HOME_TOPICS)).await?,
        room_messages: recent_activity(&db_pool, None).await?,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct TopicsQuery {
    #[serde(default)]
    q: String,
}

#[debug_handler(state = crate::AppState)]
async fn topics(
    State(db_pool): State<SqlitePool>,
    _: CurrentUser,
    Query(TopicsQuery { q }): Query<TopicsQuery>,
) -> AppResult<Json<Vec<Topic>>> {
    Ok(Json(topics_matching(&db_pool, q.trim(), None).await?))
}

#[debug_handler(state = crate::AppState)]
async fn activity_data(State(db_pool): State<SqlitePool>, _: CurrentUser) -> AppResult<Json<Vec<Activity>>> {
    Ok(Json(recent_activity(&db_pool, None).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, testutil};

    #[tokio::test]
    async fn topic_search_escapes_wildcards() {
        let db_pool = testutil::pool().await;
        for name in ["Maths", "Physics", "100% Chemistry"] {
            sqlx::query("INSERT INTO topics (name) VALUES (?)")
                .bind(name)
                .execute(&db_pool)
                .await
                .unwrap();
        }

        let all = topics_matching(&db_pool, "", None).await.unwrap();
        assert_eq!(all.len(), 3);
        let first_two = topics_matching(&db_pool, "", Some(2)).await.unwrap();
        assert_eq!(first_two.len(), 2);

        let percent = topics_matching(&db_pool, "%", None).await.unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].name, "100% Chemistry");

        let physics = topics_matching(&db_pool, "phys", None).await.unwrap();
        assert_eq!(physics.len(), 1);
    }

    #[tokio::test]
    async fn activity_hides_private_rooms() {
        let db_pool = testutil::pool().await;
        let ada = db::create_user(&db_pool, "ada", false).await.unwrap();
        let bob = db::create_user(&db_pool, "bob", false).await.unwrap();
        let open = testutil::room(&db_pool, ada, "open").await;
        let hidden = testutil::room(&db_pool, ada, "hidden").await;
        sqlx::query("UPDATE rooms SET is_private=1 WHERE id=?")
            .bind(hidden)
            .execute(&db_pool)
            .await
            .unwrap();

        testutil::message(&db_pool, hidden, ada, "secret").await;
        for i in 0..6 {
            testutil::message(&db_pool, open, if i % 2 == 0 { ada } else { bob }, &format!("m{i}")).await;
        }

        let recent = recent_activity(&db_pool, None).await.unwrap();
        assert_eq!(recent.len(), RECENT_MESSAGES as usize);
        assert!(recent.iter().all(|m| m.room_id == open));
        assert_eq!(recent[0].body, "m5");

        let by_bob = recent_activity(&db_pool, Some(bob)).await.unwrap();
        assert_eq!(by_bob.len(), 3);
        assert!(by_bob.iter().all(|m| m.username == "bob"));
    }
}
