use axum::{
    debug_handler,
    extract::State,
    response::Redirect,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{db, session::CurrentUser, AppError, AppResult};

/// Shared by every failure so the response never tells which half was wrong.
pub const INVALID_ROOM_CREDENTIALS: &str = "Invalid room ID or password. Please try again.";

#[derive(Debug, Deserialize)]
pub(crate) struct JoinForm {
    #[serde(default)]
    private_id: String,
    #[serde(default)]
    private_password: String,
}

/// Adds the user to the private room matching both credentials.
pub async fn join_private_room(
    db_pool: &SqlitePool,
    user_id: i64,
    private_id: &str,
    private_password: &str,
) -> AppResult<i64> {
    let room_id: i64 =
        sqlx::query_scalar("SELECT id FROM rooms WHERE private_id=? AND private_password=? AND is_private=1")
            .bind(private_id.trim())
            .bind(private_password)
            .fetch_optional(db_pool)
            .await?
            .ok_or_else(|| AppError::validation(INVALID_ROOM_CREDENTIALS))?;

    db::add_participant(db_pool, room_id, user_id).await?;
    info!(room_id, user_id, "joined private room");
    Ok(room_id)
}

/// What the join form expects, for clients sent here from a locked room.
#[derive(Debug, Serialize)]
pub(crate) struct JoinPrompt {
    fields: [&'static str; 2],
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_private_room_prompt(_: CurrentUser) -> Json<JoinPrompt> {
    Json(JoinPrompt {
        fields: ["private_id", "private_password"],
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn join_private_room_handler(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Form(JoinForm { private_id, private_password }): Form<JoinForm>,
) -> AppResult<Redirect> {
    let room_id = join_private_room(&db_pool, user.id, &private_id, &private_password).await?;
    Ok(Redirect::to(&format!("/room/{room_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::StudyType,
        rooms::{create_room, RoomForm},
        testutil,
    };

    fn private_form() -> RoomForm {
        RoomForm {
            name: "secret study".to_owned(),
            description: None,
            topic: None,
            study_type: Some(StudyType::Quiet),
            max_participants: Some(4),
            is_private: Some("on".to_owned()),
        }
    }

    #[tokio::test]
    async fn correct_credentials_add_the_participant() {
        let db_pool = testutil::pool().await;
        let host = db::create_user(&db_pool, "host", false).await.unwrap();
        let guest = db::create_user(&db_pool, "guest", false).await.unwrap();
        let created = create_room(&db_pool, host, private_form()).await.unwrap();
        let (private_id, password) = created.credentials.unwrap();

        let room_id = join_private_room(&db_pool, guest, &private_id, &password).await.unwrap();
        assert_eq!(room_id, created.id);
        assert!(db::is_participant(&db_pool, room_id, guest).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_id_and_wrong_password_look_the_same() {
        let db_pool = testutil::pool().await;
        let host = db::create_user(&db_pool, "host", false).await.unwrap();
        let guest = db::create_user(&db_pool, "guest", false).await.unwrap();
        let created = create_room(&db_pool, host, private_form()).await.unwrap();
        let (private_id, password) = created.credentials.unwrap();

        let wrong_password = join_private_room(&db_pool, guest, &private_id, "nope").await.unwrap_err();
        let wrong_id = join_private_room(&db_pool, guest, "ZZZZZZZZ", &password).await.unwrap_err();

        assert_eq!(wrong_password.to_string(), INVALID_ROOM_CREDENTIALS);
        assert_eq!(wrong_password.to_string(), wrong_id.to_string());
        assert!(!db::is_participant(&db_pool, created.id, guest).await.unwrap());
    }

    #[tokio::test]
    async fn public_rooms_cannot_be_joined_by_credentials() {
        let db_pool = testutil::pool().await;
        let host = db::create_user(&db_pool, "host", false).await.unwrap();
        let guest = db::create_user(&db_pool, "guest", false).await.unwrap();
        let room = testutil::room(&db_pool, host, "open").await;
        sqlx::query("UPDATE rooms SET private_id='OPENROOM',private_password='pw' WHERE id=?")
            .bind(room)
            .execute(&db_pool)
            .await
            .unwrap();

        let err = join_private_room(&db_pool, guest, "OPENROOM", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), INVALID_ROOM_CREDENTIALS);
    }
}
