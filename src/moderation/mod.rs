mod action;
mod reports;

use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::AppState;

pub use action::{act_on_report, apply_action, ActionOutcome, ActionRequest, ModerationAction};
pub use reports::{file_report, list_reports, ReportFilter};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/report/{id}", post(reports::report_message))
        .route("/moderation/reports", get(reports::admin_reports))
        .route("/moderation/reports/{id}/action", post(action::admin_report_action))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    HateSpeech,
    Inappropriate,
    Other,
}

impl ReportReason {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "spam" => Some(ReportReason::Spam),
            "harassment" => Some(ReportReason::Harassment),
            "hate_speech" => Some(ReportReason::HateSpeech),
            "inappropriate" => Some(ReportReason::Inappropriate),
            "other" => Some(ReportReason::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ReportStatus {
    Open,
    Reviewed,
}
