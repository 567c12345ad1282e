use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}, Form};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{db::Role, include_res, res::escape_html, views::Page, AppResult, AppState};

use super::Clients;

#[derive(Debug, Deserialize)]
pub(crate) struct SignupForm {
    name: String,
    email: String,
    password: String,
    role: Role,
}

fn signup_html(error: &str) -> Html<String> {
    Html(
        include_res!(str, "/pages/signup.html")
            .replace("{error}", &escape_html(error))
    )
}

#[debug_handler]
pub(crate) async fn signup_page() -> impl IntoResponse {
    signup_html("")
}

#[debug_handler(state = AppState)]
pub(crate) async fn signup(
    State(clients): State<Clients>,
    session: Session,

    Form(SignupForm { name, email, password, role }): Form<SignupForm>,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;

    if let Err(e) = manager.signup(&email, &password, name.trim(), role).await {
        return Ok(signup_html(&e.to_string()).into_response());
    }
    clients.remember(&session, &manager).await?;

    Ok(Redirect::to(Page::Dashboard.path()).into_response())
}
