use axum::{
    debug_handler,
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    rooms::msg,
    session::{CurrentUser, Moderator},
    AppError, AppResult,
};

use super::{ReportReason, ReportStatus};

const PAGE_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: Option<String>,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct ReportFiled {
    status: &'static str,
    created: bool,
}

/// Re-reporting the same message updates the reporter's existing report and
/// reopens it. Returns whether a new report was created.
pub async fn file_report(
    db_pool: &SqlitePool,
    reporter_id: i64,
    message_id: i64,
    reason: Option<&str>,
    details: &str,
) -> AppResult<bool> {
    msg::message_ref(db_pool, message_id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;

    let reason = reason
        .and_then(ReportReason::parse)
        .ok_or_else(|| AppError::validation("Invalid reason"))?;

    let now = OffsetDateTime::now_utc();
    let mut tx = db_pool.begin().await?;

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM message_reports WHERE reporter_id=? AND message_id=?")
        .bind(reporter_id)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;

    let created = match existing {
        Some(report_id) => {
            sqlx::query("UPDATE message_reports SET reason=?,details=?,status=?,updated=? WHERE id=?")
                .bind(reason)
                .bind(details)
                .bind(ReportStatus::Open)
                .bind(now)
                .bind(report_id)
                .execute(&mut *tx)
                .await?;
            false
        }
        None => {
            sqlx::query(
                "INSERT INTO message_reports (reporter_id,message_id,reason,details,status,created,updated) VALUES (?,?,?,?,?,?,?)",
            )
            .bind(reporter_id)
            .bind(message_id)
            .bind(reason)
            .bind(details)
            .bind(ReportStatus::Open)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            true
        }
    };

    tx.commit().await?;
    info!(message_id, reporter_id, ?reason, created, "message reported");
    Ok(created)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn report_message(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<i64>,
    Json(ReportRequest { reason, details }): Json<ReportRequest>,
) -> AppResult<Json<ReportFiled>> {
    let created = file_report(&db_pool, user.id, message_id, reason.as_deref(), &details).await?;
    Ok(Json(ReportFiled { status: "ok", created }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub status: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ReportView {
    pub id: i64,
    pub reason: ReportReason,
    pub details: String,
    pub status: ReportStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub reporter_id: i64,
    pub reporter_username: String,
    pub message_id: Option<i64>,
    pub message_body: Option<String>,
    pub author_id: Option<i64>,
    pub author_username: Option<String>,
    pub room_id: Option<i64>,
    pub room_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportCounts {
    pub open: i64,
    pub reviewed: i64,
    pub all: i64,
}

#[derive(Debug, Serialize)]
pub struct ReportPage {
    pub reports: Vec<ReportView>,
    pub status: String,
    pub q: String,
    pub page: i64,
    pub num_pages: i64,
    pub counts: ReportCounts,
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, status: Option<ReportStatus>, q: &'a str) {
    qb.push(
        " FROM message_reports r \
          JOIN users ru ON ru.id=r.reporter_id \
          LEFT JOIN messages m ON m.id=r.message_id \
          LEFT JOIN users au ON au.id=m.user_id \
          LEFT JOIN rooms rm ON rm.id=m.room_id \
          WHERE 1=1",
    );

    if let Some(status) = status {
        qb.push(" AND r.status=").push_bind(status);
    }

    if !q.is_empty() {
        let pattern = crate::rooms::like_pattern(q);
        qb.push(" AND (");
        let mut columns = qb.separated(" OR ");
        for column in ["m.body", "ru.username", "au.username", "rm.name"] {
            columns
                .push(format!("{column} LIKE "))
                .push_bind_unseparated(pattern.clone())
                .push_unseparated(" ESCAPE '\\'");
        }
        qb.push(")");
    }
}

pub async fn list_reports(db_pool: &SqlitePool, filter: ReportFilter) -> AppResult<ReportPage> {
    let status = filter.status.unwrap_or_else(|| "open".to_owned());
    let status_filter = match status.as_str() {
        "open" => Some(ReportStatus::Open),
        "reviewed" => Some(ReportStatus::Reviewed),
        _ => None,
    };
    let q = filter.q.unwrap_or_default().trim().to_owned();

    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
    push_filters(&mut count_qb, status_filter, &q);
    let total: i64 = count_qb.build_query_scalar().fetch_one(db_pool).await?;

    let num_pages = ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
    let page = filter.page.unwrap_or(1).clamp(1, num_pages);

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT r.id, r.reason, r.details, r.status, r.created, \
                r.reporter_id, ru.username AS reporter_username, \
                r.message_id, m.body AS message_body, \
                m.user_id AS author_id, au.username AS author_username, \
                m.room_id, rm.name AS room_name",
    );
    push_filters(&mut qb, status_filter, &q);
    qb.push(" ORDER BY r.id DESC LIMIT ")
        .push_bind(PAGE_SIZE)
        .push(" OFFSET ")
        .push_bind((page - 1) * PAGE_SIZE);
    let reports: Vec<ReportView> = qb.build_query_as().fetch_all(db_pool).await?;

    let (open, reviewed, all): (i64, i64, i64) = sqlx::query_as(
        "SELECT \
            COALESCE(SUM(status='open'),0), \
            COALESCE(SUM(status='reviewed'),0), \
            COUNT(*) \
         FROM message_reports",
    )
    .fetch_one(db_pool)
    .await?;

    Ok(ReportPage {
        reports,
        status,
        q,
        page,
        num_pages,
        counts: ReportCounts { open, reviewed, all },
    })
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn admin_reports(
    State(db_pool): State<SqlitePool>,
    _moderator: Moderator,
    Query(filter): Query<ReportFilter>,
) -> AppResult<Json<ReportPage>> {
    Ok(Json(list_reports(&db_pool, filter).await?))
}
