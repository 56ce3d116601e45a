use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use validator::Validate;

use crate::{
    db::{self, StudyType},
    session::CurrentUser,
    AppError, AppResult,
};

const PRIVATE_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PRIVATE_ID_LEN: usize = 8;
const PRIVATE_PASSWORD_LEN: usize = 6;
const DEFAULT_MAX_PARTICIPANTS: i64 = 50;

#[derive(Debug, Deserialize, Validate)]
pub struct RoomForm {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(max = 200))]
    pub topic: Option<String>,
    pub study_type: Option<StudyType>,
    #[validate(range(min = 1, max = 1000))]
    pub max_participants: Option<i64>,
    /// Checkbox value, `on` when ticked.
    pub is_private: Option<String>,
}

impl RoomForm {
    fn wants_private(&self) -> bool {
        matches!(self.is_private.as_deref(), Some("on" | "true"))
    }
}

#[derive(Debug)]
pub struct CreatedRoom {
    pub id: i64,
    /// `(private_id, private_password)` for private rooms.
    pub credentials: Option<(String, String)>,
}

#[derive(Serialize)]
struct PrivateRoomInfo {
    id: i64,
    private_id: String,
    private_password: String,
}

fn private_credentials() -> (String, String) {
    let mut rng = rand::rng();
    let private_id = (0..PRIVATE_ID_LEN)
        .map(|_| PRIVATE_ID_CHARSET[rng.random_range(0..PRIVATE_ID_CHARSET.len())] as char)
        .collect();
    let private_password = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(PRIVATE_PASSWORD_LEN)
        .map(char::from)
        .collect();
    (private_id, private_password)
}

/// `None` for blank names and the form's "new" placeholder.
async fn topic_id(db_pool: &SqlitePool, topic: Option<&str>) -> sqlx::Result<Option<i64>> {
    let Some(name) = topic.map(str::trim).filter(|name| !name.is_empty() && *name != "new") else {
        return Ok(None);
    };

    sqlx::query("INSERT OR IGNORE INTO topics (name) VALUES (?)")
        .bind(name)
        .execute(db_pool)
        .await?;
    sqlx::query_scalar("SELECT id FROM topics WHERE name=?")
        .bind(name)
        .fetch_one(db_pool)
        .await
        .map(Some)
}

pub async fn create_room(db_pool: &SqlitePool, host_id: i64, form: RoomForm) -> AppResult<CreatedRoom> {
    form.validate()?;

    let topic_id = topic_id(db_pool, form.topic.as_deref()).await?;
    let credentials = form.wants_private().then(private_credentials);
    let now = OffsetDateTime::now_utc();

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO rooms (host_id,topic_id,name,description,study_type,max_participants,is_private,private_id,private_password,created,updated) \
         VALUES (?,?,?,?,?,?,?,?,?,?,?) RETURNING id",
    )
    .bind(host_id)
    .bind(topic_id)
    .bind(form.name.trim())
    .bind(&form.description)
    .bind(form.study_type.unwrap_or_default())
    .bind(form.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS))
    .bind(credentials.is_some())
    .bind(credentials.as_ref().map(|(id, _)| id.as_str()))
    .bind(credentials.as_ref().map(|(_, password)| password.as_str()))
    .bind(now)
    .bind(now)
    .fetch_one(db_pool)
    .await?;

    db::add_participant(db_pool, id, host_id).await?;
    info!(room_id = id, host_id, private = credentials.is_some(), "room created");

    Ok(CreatedRoom { id, credentials })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn create_room_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<RoomForm>,
) -> AppResult<Response> {
    let created = create_room(&db_pool, user.id, form).await?;

    Ok(match created.credentials {
        Some((private_id, private_password)) => (
            StatusCode::CREATED,
            Json(PrivateRoomInfo {
                id: created.id,
                private_id,
                private_password,
            }),
        )
            .into_response(),
        None => Redirect::to(&format!("/room/{}", created.id)).into_response(),
    })
}

async fn hosted_room(db_pool: &SqlitePool, room_id: i64, user_id: i64) -> AppResult<db::Room> {
    let room = db::room_by_id(db_pool, room_id)
        .await?
        .ok_or(AppError::NotFound("Room"))?;
    if room.host_id != Some(user_id) {
        return Err(AppError::forbidden("You are not allowed here!"));
    }
    Ok(room)
}

pub async fn update_room(db_pool: &SqlitePool, user_id: i64, room_id: i64, form: RoomForm) -> AppResult<()> {
    form.validate()?;
    let room = hosted_room(db_pool, room_id, user_id).await?;
    let topic_id = topic_id(db_pool, form.topic.as_deref()).await?.or(room.topic_id);

    sqlx::query(
        "UPDATE rooms SET topic_id=?,name=?,description=?,study_type=?,max_participants=?,updated=? WHERE id=?",
    )
    .bind(topic_id)
    .bind(form.name.trim())
    .bind(&form.description)
    .bind(form.study_type.unwrap_or(room.study_type))
    .bind(form.max_participants.unwrap_or(room.max_participants))
    .bind(OffsetDateTime::now_utc())
    .bind(room.id)
    .execute(db_pool)
    .await?;
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn update_room_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<i64>,
    Form(form): Form<RoomForm>,
) -> AppResult<Redirect> {
    update_room(&db_pool, user.id, room_id, form).await?;
    Ok(Redirect::to(&format!("/room/{room_id}")))
}

/// Messages, votes and sessions of the room go with it.
pub async fn delete_room(db_pool: &SqlitePool, user_id: i64, room_id: i64) -> AppResult<()> {
    let room = hosted_room(db_pool, room_id, user_id).await?;
    sqlx::query("DELETE FROM rooms WHERE id=?")
        .bind(room.id)
        .execute(db_pool)
        .await?;
    info!(room_id, user_id, "room deleted");
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_room_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<i64>,
) -> AppResult<Redirect> {
    delete_room(&db_pool, user.id, room_id).await?;
    Ok(Redirect::to("/rooms"))
}
