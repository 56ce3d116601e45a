use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::{db, rooms::msg, session::Moderator, AppError, AppResult};

use super::ReportStatus;

/// Everything a moderator can do to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Resolve,
    DeleteMessage,
    SuspendUser { days: i64 },
    BanUser,
    Reopen,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    pub action: Option<String>,
    pub days: Option<Value>,
}

impl TryFrom<ActionRequest> for ModerationAction {
    type Error = AppError;

    fn try_from(req: ActionRequest) -> Result<Self, Self::Error> {
        Ok(match req.action.as_deref() {
            Some("resolve") => ModerationAction::Resolve,
            Some("delete_message") => ModerationAction::DeleteMessage,
            Some("suspend_user") => ModerationAction::SuspendUser {
                days: parse_days(req.days)?,
            },
            Some("ban_user") => ModerationAction::BanUser,
            Some("reopen") => ModerationAction::Reopen,
            _ => return Err(AppError::validation("Invalid action")),
        })
    }
}

fn parse_days(raw: Option<Value>) -> AppResult<i64> {
    let invalid = || AppError::validation("Invalid number of days provided.");
    let days = match raw {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n.as_i64().ok_or_else(invalid)?,
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };

    if days <= 0 {
        return Err(AppError::validation("Suspension days must be a positive number."));
    }
    Ok(days)
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<ReportStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_user: Option<String>,
}

impl ActionOutcome {
    fn ok(new_status: ReportStatus) -> Self {
        Self {
            status: "ok",
            new_status: Some(new_status),
            ..Default::default()
        }
    }
}

#[derive(Debug, FromRow)]
struct ReportRef {
    id: i64,
    message_id: Option<i64>,
}

#[derive(Debug, FromRow)]
struct Author {
    id: i64,
    username: String,
}

async fn set_status(db_pool: &SqlitePool, report_id: i64, status: ReportStatus) -> sqlx::Result<()> {
    sqlx::query("UPDATE message_reports SET status=?,updated=? WHERE id=?")
        .bind(status)
        .bind(OffsetDateTime::now_utc())
        .bind(report_id)
        .execute(db_pool)
        .await?;
    Ok(())
}

fn author_gone(what: &str) -> AppError {
    AppError::validation(format!("Cannot {what} user, message is deleted."))
}

async fn reported_author(db_pool: &SqlitePool, report: &ReportRef, what: &str) -> AppResult<Author> {
    let gone = || author_gone(what);
    let message_id = report.message_id.ok_or_else(gone)?;

    sqlx::query_as("SELECT u.id,u.username FROM messages m JOIN users u ON u.id=m.user_id WHERE m.id=?")
        .bind(message_id)
        .fetch_optional(db_pool)
        .await?
        .ok_or_else(gone)
}

async fn find_report(db_pool: &SqlitePool, report_id: i64) -> AppResult<ReportRef> {
    sqlx::query_as("SELECT id,message_id FROM message_reports WHERE id=?")
        .bind(report_id)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("Report"))
}

pub async fn apply_action(db_pool: &SqlitePool, report_id: i64, action: ModerationAction) -> AppResult<ActionOutcome> {
    let report = find_report(db_pool, report_id).await?;
    apply_to(db_pool, report, action).await
}

/// Handles a raw request the way the dashboard submits it: an unknown report
/// is reported first, then a missing author, and only then a bad action or
/// day count.
pub async fn act_on_report(db_pool: &SqlitePool, report_id: i64, req: ActionRequest) -> AppResult<ActionOutcome> {
    let report = find_report(db_pool, report_id).await?;

    if report.message_id.is_none() {
        match req.action.as_deref() {
            Some("suspend_user") => return Err(author_gone("suspend")),
            Some("ban_user") => return Err(author_gone("ban")),
            _ => {}
        }
    }

    let action = ModerationAction::try_from(req)?;
    apply_to(db_pool, report, action).await
}

async fn apply_to(db_pool: &SqlitePool, report: ReportRef, action: ModerationAction) -> AppResult<ActionOutcome> {
    let report_id = report.id;
    let outcome = match action {
        ModerationAction::Resolve => {
            set_status(db_pool, report.id, ReportStatus::Reviewed).await?;
            ActionOutcome::ok(ReportStatus::Reviewed)
        }
        ModerationAction::DeleteMessage => {
            let message_id = report
                .message_id
                .ok_or_else(|| AppError::validation("Message already deleted."))?;
            msg::delete_message(db_pool, message_id).await?;
            set_status(db_pool, report.id, ReportStatus::Reviewed).await?;
            ActionOutcome {
                deleted_message_id: Some(message_id),
                ..ActionOutcome::ok(ReportStatus::Reviewed)
            }
        }
        ModerationAction::SuspendUser { days } => {
            let author = reported_author(db_pool, &report, "suspend").await?;
            let until = days
                .checked_mul(86_400)
                .and_then(|secs| OffsetDateTime::now_utc().checked_add(Duration::seconds(secs)))
                .ok_or_else(|| AppError::validation("Invalid number of days provided."))?;

            db::profile_for(db_pool, author.id).await?;
            sqlx::query("UPDATE user_profiles SET suspended_until=? WHERE user_id=?")
                .bind(until)
                .bind(author.id)
                .execute(db_pool)
                .await?;
            set_status(db_pool, report.id, ReportStatus::Reviewed).await?;
            info!(user = %author.username, days, "user suspended");

            ActionOutcome {
                suspended_user_id: Some(author.id),
                days: Some(days),
                ..ActionOutcome::ok(ReportStatus::Reviewed)
            }
        }
        ModerationAction::BanUser => {
            let author = reported_author(db_pool, &report, "ban").await?;
            sqlx::query("DELETE FROM users WHERE id=?")
                .bind(author.id)
                .execute(db_pool)
                .await?;
            // gone already when the author filed this report themselves
            set_status(db_pool, report.id, ReportStatus::Reviewed).await?;
            info!(user = %author.username, "user banned");

            ActionOutcome {
                banned_user: Some(author.username),
                ..ActionOutcome::ok(ReportStatus::Reviewed)
            }
        }
        ModerationAction::Reopen => {
            set_status(db_pool, report.id, ReportStatus::Open).await?;
            ActionOutcome::ok(ReportStatus::Open)
        }
    };

    info!(report_id, ?action, "report actioned");
    Ok(outcome)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn admin_report_action(
    State(db_pool): State<SqlitePool>,
    Moderator(moderator): Moderator,
    Path(report_id): Path<i64>,
    Json(req): Json<ActionRequest>,
) -> AppResult<Json<ActionOutcome>> {
    info!(moderator = %moderator.username, report_id, "moderation action requested");
    Ok(Json(act_on_report(&db_pool, report_id, req).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{moderation::file_report, testutil};

    struct Fixture {
        db_pool: SqlitePool,
        author: i64,
        message: i64,
        report: i64,
    }

    async fn fixture() -> Fixture {
        let db_pool = testutil::pool().await;
        let author = db::create_user(&db_pool, "troll", false).await.unwrap();
        let reporter = db::create_user(&db_pool, "ada", false).await.unwrap();
        let room = testutil::room(&db_pool, reporter, "biology").await;
        let message = testutil::message(&db_pool, room, author, "rude words").await;
        file_report(&db_pool, reporter, message, Some("harassment"), "").await.unwrap();
        let report = sqlx::query_scalar("SELECT id FROM message_reports")
            .fetch_one(&db_pool)
            .await
            .unwrap();
        Fixture {
            db_pool,
            author,
            message,
            report,
        }
    }

    async fn status_of(db_pool: &SqlitePool, report: i64) -> ReportStatus {
        sqlx::query_scalar("SELECT status FROM message_reports WHERE id=?")
            .bind(report)
            .fetch_one(db_pool)
            .await
            .unwrap()
    }

    fn request(action: &str, days: Option<Value>) -> ActionRequest {
        ActionRequest {
            action: Some(action.to_owned()),
            days,
        }
    }

    #[test]
    fn wire_tags_map_onto_actions() {
        assert_eq!(
            ModerationAction::try_from(request("suspend_user", Some(Value::from(3)))).unwrap(),
            ModerationAction::SuspendUser { days: 3 }
        );
        assert_eq!(
            ModerationAction::try_from(request("suspend_user", Some(Value::from(" 4 ")))).unwrap(),
            ModerationAction::SuspendUser { days: 4 }
        );
        assert_eq!(
            ModerationAction::try_from(request("reopen", None)).unwrap(),
            ModerationAction::Reopen
        );

        let err = ModerationAction::try_from(request("nuke", None)).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid action"));
        let err = ModerationAction::try_from(ActionRequest::default()).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid action"));
    }

    #[test]
    fn suspension_days_must_be_a_positive_integer() {
        for days in [Some(Value::from(0)), Some(Value::from(-1)), None] {
            let err = ModerationAction::try_from(request("suspend_user", days)).unwrap_err();
            assert!(matches!(err, AppError::Validation(ref m) if m == "Suspension days must be a positive number."));
        }
        for days in [Value::from("two"), Value::from(2.5), Value::Bool(true)] {
            let err = ModerationAction::try_from(request("suspend_user", Some(days))).unwrap_err();
            assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid number of days provided."));
        }
    }

    #[tokio::test]
    async fn suspend_sets_the_deadline_and_reviews_the_report() {
        let f = fixture().await;
        let before = OffsetDateTime::now_utc();

        let outcome = apply_action(&f.db_pool, f.report, ModerationAction::SuspendUser { days: 5 })
            .await
            .unwrap();
        assert_eq!(outcome.suspended_user_id, Some(f.author));
        assert_eq!(outcome.days, Some(5));
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Reviewed);

        let profile = db::profile_for(&f.db_pool, f.author).await.unwrap();
        let until = profile.suspended_until.unwrap();
        let expected = before + Duration::days(5);
        assert!((until - expected).abs() < Duration::minutes(1));
        assert!(profile.suspended_at(OffsetDateTime::now_utc()).is_some());
    }

    #[tokio::test]
    async fn rejected_suspension_leaves_the_report_open() {
        let f = fixture().await;
        for days in [0, -1] {
            let err = act_on_report(&f.db_pool, f.report, request("suspend_user", Some(Value::from(days))))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(ref m) if m == "Suspension days must be a positive number."));
        }
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Open);
        let profile = db::profile_for(&f.db_pool, f.author).await.unwrap();
        assert!(profile.suspended_until.is_none());
    }

    #[tokio::test]
    async fn report_and_message_are_checked_before_the_request() {
        let f = fixture().await;

        let err = act_on_report(&f.db_pool, f.report + 1, request("nuke", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Report")));

        msg::delete_message(&f.db_pool, f.message).await.unwrap();
        let err = act_on_report(&f.db_pool, f.report, request("suspend_user", Some(Value::from(0))))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Cannot suspend user, message is deleted."));
        let err = act_on_report(&f.db_pool, f.report, request("ban_user", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Cannot ban user, message is deleted."));

        let err = act_on_report(&f.db_pool, f.report, request("nuke", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid action"));
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Open);
    }

    #[tokio::test]
    async fn delete_message_once() {
        let f = fixture().await;

        let outcome = apply_action(&f.db_pool, f.report, ModerationAction::DeleteMessage)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_message_id, Some(f.message));
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Reviewed);
        assert!(msg::message_ref(&f.db_pool, f.message).await.unwrap().is_none());

        let err = apply_action(&f.db_pool, f.report, ModerationAction::DeleteMessage)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Message already deleted."));

        let err = apply_action(&f.db_pool, f.report, ModerationAction::BanUser)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn ban_deletes_the_author_and_their_messages() {
        let f = fixture().await;

        let outcome = apply_action(&f.db_pool, f.report, ModerationAction::BanUser)
            .await
            .unwrap();
        assert_eq!(outcome.banned_user.as_deref(), Some("troll"));
        assert!(db::user_by_id(&f.db_pool, f.author).await.unwrap().is_none());
        assert!(msg::message_ref(&f.db_pool, f.message).await.unwrap().is_none());
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Reviewed);
    }

    #[tokio::test]
    async fn resolve_and_reopen_flip_status() {
        let f = fixture().await;

        apply_action(&f.db_pool, f.report, ModerationAction::Resolve).await.unwrap();
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Reviewed);

        let outcome = apply_action(&f.db_pool, f.report, ModerationAction::Reopen).await.unwrap();
        assert_eq!(outcome.new_status, Some(ReportStatus::Open));
        assert_eq!(status_of(&f.db_pool, f.report).await, ReportStatus::Open);
    }

    #[tokio::test]
    async fn unknown_report_is_not_found() {
        let f = fixture().await;
        let err = apply_action(&f.db_pool, f.report + 1, ModerationAction::Resolve)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Report")));
    }
}
