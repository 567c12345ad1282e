mod page;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(page::profile).post(page::update_profile))
        .route("/profile/refresh", post(page::refresh_profile))
}
