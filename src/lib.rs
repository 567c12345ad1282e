pub mod auth;
pub mod backend;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod profiles;
pub mod res;
pub mod session;
pub mod views;

use axum::{Router, extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, routing::get};
use tracing::error;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub clients: auth::Clients,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/dashboard", get(index::dashboard))
        .route("/student-corner", get(index::student_corner))

        .merge(auth::router())
        .merge(profiles::router())
        .merge(chat::router())

        .with_state(app_state)
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("{:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
