//! The system of record: credentials, profiles, roles and chat messages,
//! plus the two change feeds the rest of the portal listens to.

mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{AuthSession, Identity, Message, NewMessage, Profile, ProfileUpdate, Role};

pub use sqlite::{SqliteStore, StoreClient};

#[derive(Error, Debug)]
pub enum BackendError {
    /// The store refused the request. The reason is human readable.
    #[error("{0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
}

/// Delivered on every authentication transition of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub kind: AuthChangeKind,
    pub session: Option<AuthSession>,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub name: String,
    pub redirect_to: String,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: Option<Identity>,
    pub session: Option<AuthSession>,
}

/// Client-side view of the store. One value per application instance: it
/// carries that instance's current auth session.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registers for auth transitions. Only transitions after the call are seen.
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange>;

    async fn current_session(&self) -> BackendResult<Option<AuthSession>>;
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession>;
    async fn sign_up(&self, request: SignUp) -> BackendResult<SignUpOutcome>;
    async fn sign_out(&self) -> BackendResult<()>;

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>>;
    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> BackendResult<()>;
    async fn fetch_role(&self, user_id: Uuid) -> BackendResult<Option<Role>>;
    async fn insert_role(&self, user_id: Uuid, role: Role) -> BackendResult<()>;
    async fn list_profiles_with_role(&self, role: Role) -> BackendResult<Vec<Profile>>;

    /// Both directions between `a` and `b`, oldest first.
    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> BackendResult<Vec<Message>>;
    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message>;

    /// Registers for inserts on the message table, from every writer.
    fn message_inserts(&self) -> broadcast::Receiver<Message>;
}
