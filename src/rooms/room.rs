use axum::{
    debug_handler,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    attachments::Attachment,
    db::{self, Participant, Room, User},
    group::{ChatEvent, Groups},
    session::{CurrentUser, MaybeUser},
    AppError, AppResult,
};

use super::{
    msg::{self, excerpt, MessageView, NewMessage},
    study,
};

#[derive(Debug)]
pub(crate) enum Access {
    Granted(Room),
    /// A private room the viewer has not joined.
    Locked,
}

/// Loads the room and decides whether `viewer` may see it.
pub(crate) async fn check_access(db_pool: &SqlitePool, room_id: i64, viewer: Option<&User>) -> AppResult<Access> {
    let room = db::room_by_id(db_pool, room_id)
        .await?
        .ok_or(AppError::NotFound("Room"))?;

    if !room.is_private {
        return Ok(Access::Granted(room));
    }
    let Some(user) = viewer else {
        return Ok(Access::Locked);
    };

    if room.host_id == Some(user.id) || db::is_participant(db_pool, room.id, user.id).await? {
        Ok(Access::Granted(room))
    } else {
        Ok(Access::Locked)
    }
}

/// Like [`check_access`], and joins the viewer when there is still space.
pub(crate) async fn enter_room(db_pool: &SqlitePool, room_id: i64, viewer: Option<&User>) -> AppResult<Access> {
    let access = check_access(db_pool, room_id, viewer).await?;
    let (Access::Granted(room), Some(user)) = (&access, viewer) else {
        return Ok(access);
    };
    if db::is_participant(db_pool, room.id, user.id).await? {
        return Ok(access);
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM room_participants WHERE room_id=?")
        .bind(room.id)
        .fetch_one(db_pool)
        .await?;
    if count < room.max_participants {
        db::add_participant(db_pool, room.id, user.id).await?;
    } else {
        debug!(room_id = room.id, user_id = user.id, "room full, viewing without joining");
    }

    Ok(access)
}

#[derive(Serialize)]
pub(crate) struct RoomPage {
    room: Room,
    messages: Vec<MessageView>,
    participants: Vec<Participant>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(db_pool): State<SqlitePool>,
    MaybeUser(viewer): MaybeUser,
    Path(room_id): Path<i64>,
) -> AppResult<Response> {
    let Access::Granted(room) = enter_room(&db_pool, room_id, viewer.as_ref()).await? else {
        return Ok(Redirect::to("/join-private-room").into_response());
    };

    let messages = msg::list_messages(&db_pool, room.id, 0, viewer.as_ref()).await?;
    let participants = db::participants(&db_pool, room.id).await?;

    Ok(Json(RoomPage {
        room,
        messages,
        participants,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct PostMessage {
    #[serde(default)]
    pub body: String,
    pub parent_id: Option<i64>,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostedMessage {
    pub status: &'static str,
    pub message_id: i64,
    pub parent_id: Option<i64>,
    pub parent_username: Option<String>,
    pub parent_excerpt: Option<String>,
}

/// Posts over HTTP. The message is also published to the room's group so
/// connected sockets see it.
pub async fn post_to_room(
    db_pool: &SqlitePool,
    groups: &Groups,
    user: &User,
    room_id: i64,
    post: PostMessage,
) -> AppResult<Option<PostedMessage>> {
    let Access::Granted(room) = enter_room(db_pool, room_id, Some(user)).await? else {
        return Ok(None);
    };

    let attachment = post
        .file_name
        .as_deref()
        .map(|file_name| Attachment::for_upload(&user.username, file_name));
    if post.body.trim().is_empty() && attachment.is_none() {
        return Err(AppError::validation("Message body cannot be empty"));
    }

    // a parent from another room is dropped rather than rejected
    let parent: Option<(i64, String, String)> = match post.parent_id {
        Some(parent_id) => {
            sqlx::query_as(
                "SELECT m.id,u.username,m.body FROM messages m JOIN users u ON u.id=m.user_id WHERE m.id=? AND m.room_id=?",
            )
            .bind(parent_id)
            .bind(room.id)
            .fetch_optional(db_pool)
            .await?
        }
        None => None,
    };

    let persisted = msg::insert_message(
        db_pool,
        NewMessage {
            room_id: room.id,
            user_id: user.id,
            body: &post.body,
            parent_id: parent.as_ref().map(|(id, _, _)| *id),
            attachment,
        },
    )
    .await?;

    db::add_participant(db_pool, room.id, user.id).await?;
    study::ensure_open_session(db_pool, user.id, room.id).await?;

    groups.publish(
        room.id,
        ChatEvent {
            message: post.body,
            username: user.username.clone(),
            created: persisted.created,
            message_id: persisted.id,
            user_id: user.id,
        },
    );

    let (parent_id, parent_username, parent_excerpt) = match parent {
        Some((id, username, body)) => (Some(id), Some(username), Some(excerpt(&body))),
        None => (None, None, None),
    };

    Ok(Some(PostedMessage {
        status: "success",
        message_id: persisted.id,
        parent_id,
        parent_username,
        parent_excerpt,
    }))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn post_message(
    State(db_pool): State<SqlitePool>,
    State(groups): State<Groups>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<i64>,
    Json(post): Json<PostMessage>,
) -> AppResult<Response> {
    Ok(match post_to_room(&db_pool, &groups, &user, room_id, post).await? {
        Some(posted) => Json(posted).into_response(),
        None => Redirect::to("/join-private-room").into_response(),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoomDataQuery {
    last_id: Option<i64>,
}

#[derive(Serialize)]
pub(crate) struct RoomData {
    messages: Vec<MessageView>,
    participants: Vec<Participant>,
    last_id: i64,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_data(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(room_id): Path<i64>,
    Query(RoomDataQuery { last_id }): Query<RoomDataQuery>,
) -> AppResult<Response> {
    let Access::Granted(room) = check_access(&db_pool, room_id, Some(&user)).await? else {
        return Err(AppError::forbidden("You are not allowed here!"));
    };

    let last_id = last_id.unwrap_or(0);
    let messages = msg::list_messages(&db_pool, room.id, last_id, Some(&user)).await?;
    let participants = db::participants(&db_pool, room.id).await?;
    let last_id = messages.last().map_or(last_id, |m| m.id);

    Ok(Json(RoomData {
        messages,
        participants,
        last_id,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rooms::{create_room, RoomForm},
        testutil,
    };

    async fn user(db_pool: &SqlitePool, name: &str) -> User {
        let id = db::create_user(db_pool, name, false).await.unwrap();
        db::user_by_id(db_pool, id).await.unwrap().unwrap()
    }

    fn post(body: &str) -> PostMessage {
        PostMessage {
            body: body.to_owned(),
            parent_id: None,
            file_name: None,
        }
    }

    #[tokio::test]
    async fn private_rooms_are_locked_to_outsiders() {
        let db_pool = testutil::pool().await;
        let host = user(&db_pool, "host").await;
        let outsider = user(&db_pool, "outsider").await;
        let created = create_room(
            &db_pool,
            host.id,
            RoomForm {
                name: "secret".to_owned(),
                description: None,
                topic: None,
                study_type: None,
                max_participants: None,
                is_private: Some("on".to_owned()),
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            enter_room(&db_pool, created.id, Some(&outsider)).await.unwrap(),
            Access::Locked
        ));
        assert!(matches!(enter_room(&db_pool, created.id, None).await.unwrap(), Access::Locked));
        assert!(matches!(
            enter_room(&db_pool, created.id, Some(&host)).await.unwrap(),
            Access::Granted(_)
        ));

        let groups = Groups::new(8);
        let posted = post_to_room(&db_pool, &groups, &outsider, created.id, post("let me in"))
            .await
            .unwrap();
        assert!(posted.is_none());
    }

    #[tokio::test]
    async fn viewing_joins_until_the_room_is_full() {
        let db_pool = testutil::pool().await;
        let host = user(&db_pool, "host").await;
        let room_id = testutil::room(&db_pool, host.id, "tiny").await;
        sqlx::query("UPDATE rooms SET max_participants=2 WHERE id=?")
            .bind(room_id)
            .execute(&db_pool)
            .await
            .unwrap();
        db::add_participant(&db_pool, room_id, host.id).await.unwrap();

        let second = user(&db_pool, "second").await;
        let third = user(&db_pool, "third").await;
        enter_room(&db_pool, room_id, Some(&second)).await.unwrap();
        enter_room(&db_pool, room_id, Some(&third)).await.unwrap();

        assert!(db::is_participant(&db_pool, room_id, second.id).await.unwrap());
        assert!(!db::is_participant(&db_pool, room_id, third.id).await.unwrap());
    }

    #[tokio::test]
    async fn checking_access_never_joins() {
        let db_pool = testutil::pool().await;
        let host = user(&db_pool, "host").await;
        let poller = user(&db_pool, "poller").await;
        let room_id = testutil::room(&db_pool, host.id, "open").await;

        for _ in 0..2 {
            assert!(matches!(
                check_access(&db_pool, room_id, Some(&poller)).await.unwrap(),
                Access::Granted(_)
            ));
        }
        assert!(!db::is_participant(&db_pool, room_id, poller.id).await.unwrap());
        assert!(db::participants(&db_pool, room_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn posting_threads_joins_and_broadcasts() {
        let db_pool = testutil::pool().await;
        let groups = Groups::new(8);
        let host = user(&db_pool, "host").await;
        let poster = user(&db_pool, "poster").await;
        let room_id = testutil::room(&db_pool, host.id, "history").await;
        let other_room = testutil::room(&db_pool, host.id, "geography").await;
        let parent = testutil::message(&db_pool, room_id, host.id, &"x".repeat(100)).await;
        let foreign = testutil::message(&db_pool, other_room, host.id, "elsewhere").await;
        let mut sub = groups.subscribe(room_id);

        let reply = PostMessage {
            parent_id: Some(parent),
            ..post("agreed")
        };
        let posted = post_to_room(&db_pool, &groups, &poster, room_id, reply)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(posted.parent_id, Some(parent));
        assert_eq!(posted.parent_username.as_deref(), Some("host"));
        assert_eq!(posted.parent_excerpt.unwrap().len(), 83);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.message_id, posted.message_id);
        assert_eq!(event.message, "agreed");

        assert!(db::is_participant(&db_pool, room_id, poster.id).await.unwrap());
        let (sessions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM study_sessions WHERE user_id=? AND room_id=?")
            .bind(poster.id)
            .bind(room_id)
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(sessions, 1);

        let cross = PostMessage {
            parent_id: Some(foreign),
            ..post("wrong thread")
        };
        let posted = post_to_room(&db_pool, &groups, &poster, room_id, cross)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(posted.parent_id, None);
    }

    #[tokio::test]
    async fn empty_posts_are_rejected_unless_they_carry_a_file() {
        let db_pool = testutil::pool().await;
        let groups = Groups::new(8);
        let host = user(&db_pool, "host").await;
        let room_id = testutil::room(&db_pool, host.id, "art").await;

        let err = post_to_room(&db_pool, &groups, &host, room_id, post("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let with_file = PostMessage {
            file_name: Some("sketch.png".to_owned()),
            ..post("")
        };
        assert!(post_to_room(&db_pool, &groups, &host, room_id, with_file)
            .await
            .unwrap()
            .is_some());
    }
}
