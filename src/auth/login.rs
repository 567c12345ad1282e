use axum::{debug_handler, extract::{Query, State}, response::{Html, IntoResponse, Redirect, Response}, Form};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{include_res, res::escape_html, session::RETURN_URL, views::Page, AppResult, AppState};

use super::{Clients, local_path};

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    pub(crate) return_url: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    email: String,
    password: String,
}

pub(crate) fn login_html(error: &str) -> Html<String> {
    Html(
        include_res!(str, "/pages/login.html")
            .replace("{error}", &escape_html(error))
    )
}

#[debug_handler]
pub(crate) async fn login_page(
    Query(LoginQuery { return_url }): Query<LoginQuery>,
    session: Session,
) -> AppResult<Response> {
    if let Some(return_url) = return_url.as_deref().and_then(local_path) {
        session.insert(RETURN_URL, return_url).await?;
    }

    Ok(login_html("").into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(clients): State<Clients>,
    session: Session,

    Form(LoginForm { email, password }): Form<LoginForm>,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;

    if let Err(e) = manager.login(&email, &password).await {
        return Ok(login_html(&e.to_string()).into_response());
    }
    clients.remember(&session, &manager).await?;

    let return_url = session.remove::<String>(RETURN_URL).await?;
    let target = return_url.as_deref().and_then(local_path).unwrap_or(Page::Dashboard.path());
    Ok(Redirect::to(target).into_response())
}
