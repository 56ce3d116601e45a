mod page;
mod update;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use page::{profile_page, ProfilePage};
pub use update::{update_profile, ProfileUpdate};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile/{id}", get(page::profile))
        .route("/update-user", post(update::update_user))
}
