#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use campus_portal::{
    backend::{AuthChange, Backend, BackendError, BackendResult, SignUp, SignUpOutcome, SqliteStore, StoreClient},
    db::{AuthSession, Message, NewMessage, Profile, ProfileUpdate, Role},
    session::{SessionManager, SessionState},
};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const PATIENCE: Duration = Duration::from_secs(5);
pub const PASSWORD: &str = "hunter22";

/// Wraps a real client, records every call in order and fails the ones it is
/// told to.
pub struct RecordingBackend {
    inner: StoreClient,
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<HashSet<&'static str>>,
    during_fetch: Mutex<Option<NewMessage>>,
}

impl RecordingBackend {
    pub fn new(inner: StoreClient) -> Arc<Self> {
        Arc::new(RecordingBackend {
            inner,
            calls: Mutex::default(),
            failing: Mutex::default(),
            during_fetch: Mutex::default(),
        })
    }

    pub fn fail(&self, call: &'static str) {
        self.failing.lock().unwrap().insert(call);
    }

    pub fn heal(&self, call: &'static str) {
        self.failing.lock().unwrap().remove(call);
    }

    /// Writes `message` while the next conversation fetch is in flight, after
    /// the caller has asked for it and before the rows are read.
    pub fn insert_during_fetch(&self, message: NewMessage) {
        *self.during_fetch.lock().unwrap() = Some(message);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &'static str) -> bool {
        self.calls().contains(&call)
    }

    fn record(&self, call: &'static str) -> BackendResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(call) {
            return Err(BackendError::Unavailable(format!("{call} failed on purpose")));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.calls.lock().unwrap().push("auth_changes");
        self.inner.auth_changes()
    }

    async fn current_session(&self) -> BackendResult<Option<AuthSession>> {
        self.record("current_session")?;
        self.inner.current_session().await
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        self.record("sign_in")?;
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(&self, request: SignUp) -> BackendResult<SignUpOutcome> {
        self.record("sign_up")?;
        self.inner.sign_up(request).await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.record("sign_out")?;
        self.inner.sign_out().await
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        self.record("fetch_profile")?;
        self.inner.fetch_profile(user_id).await
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> BackendResult<()> {
        self.record("update_profile")?;
        self.inner.update_profile(user_id, update).await
    }

    async fn fetch_role(&self, user_id: Uuid) -> BackendResult<Option<Role>> {
        self.record("fetch_role")?;
        self.inner.fetch_role(user_id).await
    }

    async fn insert_role(&self, user_id: Uuid, role: Role) -> BackendResult<()> {
        self.record("insert_role")?;
        self.inner.insert_role(user_id, role).await
    }

    async fn list_profiles_with_role(&self, role: Role) -> BackendResult<Vec<Profile>> {
        self.record("list_profiles_with_role")?;
        self.inner.list_profiles_with_role(role).await
    }

    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> BackendResult<Vec<Message>> {
        self.record("fetch_conversation")?;
        let racing = self.during_fetch.lock().unwrap().take();
        if let Some(message) = racing {
            self.inner.insert_message(message).await?;
            tokio::task::yield_now().await;
        }
        self.inner.fetch_conversation(a, b).await
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        self.record("insert_message")?;
        self.inner.insert_message(message).await
    }

    fn message_inserts(&self) -> broadcast::Receiver<Message> {
        self.calls.lock().unwrap().push("message_inserts");
        self.inner.message_inserts()
    }
}

/// Registers `email` with `role` straight through the store and returns its id.
pub async fn register(store: &Arc<SqliteStore>, email: &str, name: &str, role: Role) -> Uuid {
    let client = store.client();
    let user = client
        .sign_up(SignUp {
            email: email.to_owned(),
            password: PASSWORD.to_owned(),
            name: name.to_owned(),
            redirect_to: "http://localhost:8080/".to_owned(),
        })
        .await
        .unwrap()
        .user
        .unwrap();
    client.insert_role(user.id, role).await.unwrap();
    client.sign_out().await.unwrap();
    user.id
}

pub async fn wait_until(manager: &SessionManager, mut done: impl FnMut(&SessionState) -> bool) -> SessionState {
    let mut state = manager.subscribe();
    let reached = tokio::time::timeout(PATIENCE, state.wait_for(|state| done(state)))
        .await
        .expect("session state never reached")
        .expect("session manager went away")
        .clone();
    reached
}
