use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;

use crate::db;

/// One in-memory database per test; a single pinned connection keeps it alive.
pub(crate) async fn pool() -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("in-memory sqlite");
    db::migrate(&db_pool).await.expect("migrations");
    db_pool
}

pub(crate) async fn room(db_pool: &SqlitePool, host_id: i64, name: &str) -> i64 {
    let now = OffsetDateTime::now_utc();
    sqlx::query_scalar("INSERT INTO rooms (host_id,name,created,updated) VALUES (?,?,?,?) RETURNING id")
        .bind(host_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(db_pool)
        .await
        .expect("room")
}

pub(crate) async fn message(db_pool: &SqlitePool, room_id: i64, user_id: i64, body: &str) -> i64 {
    crate::rooms::msg::insert_message(
        db_pool,
        crate::rooms::msg::NewMessage {
            room_id,
            user_id,
            body,
            parent_id: None,
            attachment: None,
        },
    )
    .await
    .expect("message")
    .id
}
