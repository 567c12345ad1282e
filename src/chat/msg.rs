use pulldown_cmark::{Event, Parser};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::Message;

use super::contacts::Contact;

/// Sent by the browser over the chat socket.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ChatCommand {
    Select { counterpart: Uuid },
    Send { text: String },
}

/// Sent to the browser over the chat socket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ChatEvent {
    History {
        counterpart: Contact,
        messages: Vec<MessageView>,
    },
    Message {
        message: MessageView,
    },
    /// Toast-style notice. `draft` carries unsent text back.
    Notice {
        text: String,
        draft: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageView {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    mine: bool,
    content: String,
    content_html: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    is_read: bool,
}

impl MessageView {
    pub(crate) fn new(message: Message, me: Uuid) -> Self {
        MessageView {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            mine: message.sender_id == me,
            content_html: content_to_html(&message.content),
            content: message.content,
            created_at: message.created_at,
            is_read: message.is_read,
        }
    }
}

/// Markdown to HTML. Raw HTML in the content is shown as text.
pub(crate) fn content_to_html(content: &str) -> String {
    let parser = Parser::new(content).map(|event| match event {
        Event::Html(html) | Event::InlineHtml(html) => Event::Text(html),
        _ => event,
    });

    let mut content_html = String::new();
    pulldown_cmark::html::push_html(&mut content_html, parser);
    content_html
}
