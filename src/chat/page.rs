use axum::{
    debug_handler,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, AppState, auth::Clients, include_res, res::escape_html, views::{self, Page, ROLE_PATIENCE}};

use super::contacts;

#[derive(Deserialize)]
pub(crate) struct ChatQuery {
    #[serde(default)]
    q: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn chat_page(
    State(clients): State<Clients>,
    Query(ChatQuery { q }): Query<ChatQuery>,
    session: Session,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;
    if !manager.snapshot().is_authenticated() {
        return Ok(Redirect::to(&format!("/login?return_url={}", Page::Chat.path())).into_response());
    }

    let role = manager.resolved_role(ROLE_PATIENCE).await;
    let variant = views::select(role);
    let contacts = contacts::contacts_for(manager.backend().as_ref(), role, &q).await?;

    let mut contact_items = String::new();
    for contact in contacts {
        contact_items += &include_res!(str, "/pages/chat/contact_item.html")
            .replace("{id}", &contact.id.to_string())
            .replace("{initials}", &escape_html(&contact.initials()))
            .replace("{name}", &escape_html(&contact.name))
            .replace("{department}", &escape_html(&contact.department));
    }

    Ok(Html(
        include_res!(str, "/pages/chat/chat.html")
            .replace("{title}", Page::Chat.title(variant))
            .replace("{contact_noun}", variant.contact_noun())
            .replace("{query}", &escape_html(&q))
            .replace("{contact_items}", &contact_items)
    ).into_response())
}
