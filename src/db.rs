use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use time::OffsetDateTime;

pub async fn connect(url: &str, max_connections: u32) -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(db_pool).await
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StudyType {
    Quiet,
    #[default]
    Discussion,
    Teaching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PreferredStudyTime {
    Morning,
    Afternoon,
    Evening,
    Night,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_moderator: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Room {
    pub id: i64,
    pub host_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub study_type: StudyType,
    pub max_participants: i64,
    pub is_active: bool,
    pub is_private: bool,
    #[serde(skip_serializing)]
    pub private_id: Option<String>,
    #[serde(skip_serializing)]
    pub private_password: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Profile {
    pub user_id: i64,
    pub bio: String,
    pub avatar: Option<String>,
    pub study_streak: i64,
    pub total_study_hours: f64,
    pub reputation_points: i64,
    pub preferred_study_time: Option<PreferredStudyTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub suspended_until: Option<OffsetDateTime>,
}

impl Profile {
    /// A suspension is active while `suspended_until` lies in the future.
    pub fn suspended_at(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        self.suspended_until.filter(|until| *until > now)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Participant {
    pub id: i64,
    pub username: String,
}

pub async fn create_user(db_pool: &SqlitePool, username: &str, is_moderator: bool) -> sqlx::Result<i64> {
    sqlx::query_scalar("INSERT INTO users (username,is_moderator,created) VALUES (?,?,?) RETURNING id")
        .bind(username)
        .bind(is_moderator)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(db_pool)
        .await
}

pub async fn user_by_id(db_pool: &SqlitePool, user_id: i64) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT id,username,is_moderator,created FROM users WHERE id=?")
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

pub async fn user_by_username(db_pool: &SqlitePool, username: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT id,username,is_moderator,created FROM users WHERE username=?")
        .bind(username)
        .fetch_optional(db_pool)
        .await
}

pub async fn room_by_id(db_pool: &SqlitePool, room_id: i64) -> sqlx::Result<Option<Room>> {
    sqlx::query_as("SELECT * FROM rooms WHERE id=?")
        .bind(room_id)
        .fetch_optional(db_pool)
        .await
}

pub async fn profile_for(db_pool: &SqlitePool, user_id: i64) -> sqlx::Result<Profile> {
    sqlx::query("INSERT OR IGNORE INTO user_profiles (user_id) VALUES (?)")
        .bind(user_id)
        .execute(db_pool)
        .await?;

    sqlx::query_as("SELECT * FROM user_profiles WHERE user_id=?")
        .bind(user_id)
        .fetch_one(db_pool)
        .await
}

pub async fn is_participant(db_pool: &SqlitePool, room_id: i64, user_id: i64) -> sqlx::Result<bool> {
    Ok(sqlx::query("SELECT 1 FROM room_participants WHERE room_id=? AND user_id=?")
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?
        .is_some())
}

pub async fn add_participant(db_pool: &SqlitePool, room_id: i64, user_id: i64) -> sqlx::Result<()> {
    sqlx::query("INSERT OR IGNORE INTO room_participants (room_id,user_id) VALUES (?,?)")
        .bind(room_id)
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn participants(db_pool: &SqlitePool, room_id: i64) -> sqlx::Result<Vec<Participant>> {
    sqlx::query_as(
        "SELECT u.id,u.username FROM room_participants p JOIN users u ON u.id=p.user_id WHERE p.room_id=? ORDER BY u.username",
    )
    .bind(room_id)
    .fetch_all(db_pool)
    .await
}
