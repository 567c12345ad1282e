use axum::{
    debug_handler,
    extract::{State, WebSocketUpgrade, ws::{Message as WsMessage, WebSocket}},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::broadcast::error::RecvError;
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::{AppResult, AppState, auth::Clients, db::Role, views::ROLE_PATIENCE};

use super::{
    contacts,
    msg::{ChatCommand, ChatEvent, MessageView},
    store::ConversationStore,
};

#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    State(clients): State<Clients>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let manager = clients.manager(&session).await?;
    let Some(me) = manager.snapshot().identity().map(|identity| identity.id) else {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    };
    let role = manager.resolved_role(ROLE_PATIENCE).await;
    let store = ConversationStore::new(manager.backend().clone(), me, role, clients.responder());

    Ok(ws.on_upgrade(move |socket| serve(socket, store, role)))
}

async fn serve(socket: WebSocket, mut store: ConversationStore, role: Option<Role>) {
    let (mut sender, mut receiver) = socket.split();
    let mut appended = store.appended();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(frame)) = incoming else {
                    break;
                };
                let text = match frame {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };
                let Ok(command) = serde_json::from_str::<ChatCommand>(text.as_str()) else {
                    debug!("ignoring malformed chat command");
                    continue;
                };

                if let Some(event) = handle(&mut store, role, command).await {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
            }
            delivered = appended.recv() => {
                let message = match delivered {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("chat socket of {} skipped {skipped} messages", store.me());
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                // may predate a counterpart switch
                if !store.belongs(&message) {
                    continue;
                }

                let event = ChatEvent::Message { message: MessageView::new(message, store.me()) };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    store.close();
}

async fn handle(store: &mut ConversationStore, role: Option<Role>, command: ChatCommand) -> Option<ChatEvent> {
    match command {
        ChatCommand::Select { counterpart } => {
            let contact = match contacts::find_contact(store.backend().as_ref(), role, counterpart).await {
                Ok(Some(contact)) => contact,
                Ok(None) => return Some(notice("Unknown contact", None)),
                Err(e) => return Some(notice(&e.to_string(), None)),
            };

            let me = store.me();
            match store.select_counterpart(contact.clone()).await {
                Ok(messages) => Some(ChatEvent::History {
                    counterpart: contact,
                    messages: messages.into_iter().map(|message| MessageView::new(message, me)).collect(),
                }),
                Err(e) => Some(notice(&e.to_string(), None)),
            }
        }
        ChatCommand::Send { text } => match store.send(&text).await {
            Ok(_) => None,
            Err(e) => Some(notice(&e.to_string(), Some(store.draft().to_owned()))),
        },
    }
}

fn notice(text: &str, draft: Option<String>) -> ChatEvent {
    ChatEvent::Notice { text: text.to_owned(), draft }
}

async fn send_event(sender: &mut SplitSink<WebSocket, WsMessage>, event: &ChatEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("could not encode chat event: {e}");
            return Ok(());
        }
    };
    sender.send(WsMessage::Text(json.into())).await
}
