use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, AppState};

use super::{Clients, local_path};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    State(clients): State<Clients>,
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    session: Session,
) -> AppResult<Redirect> {
    let manager = clients.manager(&session).await?;
    manager.logout().await;
    clients.forget(&session).await?;

    Ok(Redirect::to(return_url.as_deref().and_then(local_path).unwrap_or("/login")))
}
