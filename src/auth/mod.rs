use axum::{Router, routing::get};

use crate::AppState;

mod clients;
mod login;
mod logout;
mod signup;

pub use clients::Clients;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page).post(login::login))
        .route("/signup", get(signup::signup_page).post(signup::signup))
        .route("/logout", get(logout::logout))
}

/// `url` if it is a path on this site. Absolute and protocol-relative URLs
/// are refused.
pub(crate) fn local_path(url: &str) -> Option<&str> {
    let local = url.starts_with('/')
        && !url.starts_with("//")
        && !url.contains('\\')
        && !url.chars().any(char::is_control);
    local.then_some(url)
}
