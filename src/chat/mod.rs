mod contacts;
mod msg;
mod page;
mod responder;
mod store;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub use contacts::{Contact, contacts_for, find_contact};
pub use responder::{AutoResponder, CannedReplies, DEFAULT_REPLY_DELAY, NoReplies};
pub use store::{ConversationStore, SendOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", get(page::chat_page))
        .route("/chat/ws", get(ws::chat_ws))
}
