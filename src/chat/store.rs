use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    backend::Backend,
    db::{Message, NewMessage, Role},
    error::{PortalError, PortalResult},
    session::SessionManager,
};

use super::{contacts::Contact, responder::AutoResponder};

const APPENDED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(Message),
    /// Nothing to send, or nobody to send it to.
    Skipped,
}

/// A live insert subscription. Dropping it stops delivery.
struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct Conversation {
    // bumped on every counterpart change
    generation: u64,
    counterpart: Option<Uuid>,
    messages: Vec<Message>,
    // appends while set are reported through the history, not announced
    loading: bool,
}

impl Conversation {
    /// Appends unless the message is already there.
    fn append(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|known| known.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Message history with one counterpart at a time, kept live from the insert
/// feed.
///
/// Messages only enter the list through the history fetch or the feed; a
/// successful [`send`](ConversationStore::send) does not append locally.
pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    me: Uuid,
    role: Option<Role>,
    responder: Arc<dyn AutoResponder>,

    counterpart: Option<Contact>,
    draft: String,

    conversation: Arc<Mutex<Conversation>>,
    appended: broadcast::Sender<Message>,
    subscription: Option<Subscription>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn Backend>, me: Uuid, role: Option<Role>, responder: Arc<dyn AutoResponder>) -> Self {
        ConversationStore {
            backend,
            me,
            role,
            responder,
            counterpart: None,
            draft: String::new(),
            conversation: Arc::new(Mutex::new(Conversation::default())),
            appended: broadcast::channel(APPENDED_CAPACITY).0,
            subscription: None,
        }
    }

    /// A store for whoever is signed in to `manager`.
    pub fn for_session(manager: &SessionManager, responder: Arc<dyn AutoResponder>) -> PortalResult<Self> {
        let state = manager.snapshot();
        let me = state.identity().ok_or(PortalError::NotAuthenticated)?.id;
        Ok(Self::new(manager.backend().clone(), me, state.role, responder))
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn counterpart(&self) -> Option<&Contact> {
        self.counterpart.as_ref()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Every message appended from the feed, for the current counterpart at
    /// the time of the append.
    pub fn appended(&self) -> broadcast::Receiver<Message> {
        self.appended.subscribe()
    }

    /// Whether `message` belongs with the counterpart selected right now.
    pub fn belongs(&self, message: &Message) -> bool {
        self.counterpart
            .as_ref()
            .is_some_and(|counterpart| message.is_between(self.me, counterpart.id))
    }

    /// Switches to `contact`: drops the old subscription, subscribes for the
    /// new pair, then loads its history.
    pub async fn select_counterpart(&mut self, contact: Contact) -> PortalResult<Vec<Message>> {
        self.subscription = None;

        let generation = {
            let mut conversation = self.lock();
            conversation.generation += 1;
            conversation.counterpart = Some(contact.id);
            conversation.messages.clear();
            conversation.loading = true;
            conversation.generation
        };

        debug!("{} now talking to {}", self.me, contact.id);
        self.subscription = Some(self.subscribe(contact.id, generation));
        self.counterpart = Some(contact);

        self.load_history().await
    }

    fn subscribe(&self, counterpart: Uuid, generation: u64) -> Subscription {
        let mut inserts = self.backend.message_inserts();
        let conversation = self.conversation.clone();
        let appended = self.appended.clone();
        let me = self.me;

        let task = tokio::spawn(async move {
            loop {
                let message = match inserts.recv().await {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("conversation {me}/{counterpart} skipped {skipped} inserts");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if !message.is_between(me, counterpart) {
                    continue;
                }

                {
                    let mut conversation = conversation.lock().unwrap_or_else(PoisonError::into_inner);
                    if conversation.generation != generation {
                        break;
                    }
                    if !conversation.append(message.clone()) || conversation.loading {
                        continue;
                    }
                }

                let _ = appended.send(message);
            }
        });

        Subscription { task }
    }

    /// Replaces the list with the stored history of the current pair. Messages
    /// that arrived from the feed during the fetch are kept after it and are
    /// part of the returned list only; [`appended`](Self::appended) does not
    /// repeat them. On failure the list is left empty.
    pub async fn load_history(&self) -> PortalResult<Vec<Message>> {
        let Some(counterpart) = self.counterpart.as_ref().map(|counterpart| counterpart.id) else {
            return Ok(Vec::new());
        };
        let generation = {
            let mut conversation = self.lock();
            conversation.loading = true;
            conversation.generation
        };

        let fetched = self.backend.fetch_conversation(self.me, counterpart).await;

        let mut conversation = self.lock();
        if conversation.generation != generation {
            return Ok(conversation.messages.clone());
        }
        conversation.loading = false;

        match fetched {
            Ok(history) => {
                let live = std::mem::replace(&mut conversation.messages, history);
                for message in live {
                    conversation.append(message);
                }
                Ok(conversation.messages.clone())
            }
            Err(e) => {
                conversation.messages.clear();
                Err(PortalError::Fetch { what: "messages", reason: e.to_string() })
            }
        }
    }

    /// Sends `text` to the counterpart. The draft keeps `text` until the write
    /// succeeds.
    pub async fn send(&mut self, text: &str) -> PortalResult<SendOutcome> {
        self.draft = text.to_owned();
        self.send_draft().await
    }

    pub async fn send_draft(&mut self) -> PortalResult<SendOutcome> {
        let content = self.draft.trim();
        let Some(counterpart) = self.counterpart.as_ref().map(|counterpart| counterpart.id) else {
            return Ok(SendOutcome::Skipped);
        };
        if content.is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let message = NewMessage {
            sender_id: self.me,
            receiver_id: counterpart,
            content: content.to_owned(),
        };

        match self.backend.insert_message(message).await {
            Ok(message) => {
                self.draft.clear();
                if self.role == Some(Role::Student) {
                    self.responder.respond(self.backend.clone(), counterpart, self.me);
                }
                Ok(SendOutcome::Sent(message))
            }
            Err(e) => {
                warn!("message from {} to {counterpart} not sent: {e}", self.me);
                Err(PortalError::Send(e.to_string()))
            }
        }
    }

    /// Unsubscribes and forgets the counterpart.
    pub fn close(&mut self) {
        self.subscription = None;
        self.counterpart = None;

        let mut conversation = self.lock();
        conversation.generation += 1;
        conversation.counterpart = None;
        conversation.messages.clear();
        conversation.loading = false;
    }
}
