use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Serialize;
use tower_sessions::Session;

use crate::{auth::Clients, db::ProfileUpdate, error::PortalError, AppResult, AppState};

/// `{ success, error }`, so forms can show the reason inline.
#[derive(Debug, Serialize)]
pub(crate) struct Outcome {
    success: bool,
    error: Option<String>,
}

impl From<Result<(), PortalError>> for Outcome {
    fn from(result: Result<(), PortalError>) -> Self {
        match result {
            Ok(()) => Outcome { success: true, error: None },
            Err(e) => Outcome { success: false, error: Some(e.to_string()) },
        }
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;
    let state = manager.snapshot();

    if !state.is_authenticated() {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    Ok(Json(serde_json::json!({
        "user": state.identity(),
        "profile": state.profile,
        "role": state.role,
    })).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn update_profile(
    State(clients): State<Clients>,
    session: Session,

    Form(update): Form<ProfileUpdate>,
) -> AppResult<Json<Outcome>> {
    let manager = clients.manager(&session).await?;
    Ok(Json(manager.update_profile(update.without_blanks()).await.into()))
}

#[debug_handler(state = AppState)]
pub(crate) async fn refresh_profile(
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Json<Outcome>> {
    let manager = clients.manager(&session).await?;
    Ok(Json(manager.refresh_profile().await.into()))
}
