use std::sync::{Arc, Mutex, PoisonError};

use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version, password_hash::SaltString};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, sqlite::SqlitePoolOptions};
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::{AuthSession, Identity, Message, NewMessage, Profile, ProfileUpdate, Role},
    include_res,
};

use super::{AuthChange, AuthChangeKind, Backend, BackendError, BackendResult, SignUp, SignUpOutcome};

const FEED_CAPACITY: usize = 256;
const MIN_PASSWORD_LEN: usize = 6;

const PROFILE_COLUMNS: &str = "id,user_id,name,email,phone,address,avatar_url,student_id,department,batch,semester,section,designation,date_of_birth,blood_group,guardian_name,guardian_phone,created_at,updated_at";

#[derive(FromRow)]
struct ProfileRow {
    id: String,
    user_id: String,
    name: String,
    email: String,
    phone: Option<String>,
    address: Option<String>,
    avatar_url: Option<String>,
    student_id: Option<String>,
    department: Option<String>,
    batch: Option<String>,
    semester: Option<String>,
    section: Option<String>,
    designation: Option<String>,
    date_of_birth: Option<String>,
    blood_group: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = BackendError;

    fn try_from(row: ProfileRow) -> BackendResult<Profile> {
        Ok(Profile {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            name: row.name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            avatar_url: row.avatar_url,
            student_id: row.student_id,
            department: row.department,
            batch: row.batch,
            semester: row.semester,
            section: row.section,
            designation: row.designation,
            date_of_birth: row.date_of_birth,
            blood_group: row.blood_group,
            guardian_name: row.guardian_name,
            guardian_phone: row.guardian_phone,
            created_at: from_nanos(row.created_at)?,
            updated_at: from_nanos(row.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    content: String,
    created_at: i64,
    is_read: bool,
}

impl TryFrom<MessageRow> for Message {
    type Error = BackendError;

    fn try_from(row: MessageRow) -> BackendResult<Message> {
        Ok(Message {
            id: parse_id(&row.id)?,
            sender_id: parse_id(&row.sender_id)?,
            receiver_id: parse_id(&row.receiver_id)?,
            content: row.content,
            created_at: from_nanos(row.created_at)?,
            is_read: row.is_read,
        })
    }
}

fn parse_id(id: &str) -> BackendResult<Uuid> {
    Uuid::parse_str(id).map_err(|e| BackendError::Corrupt(format!("bad id {id:?}: {e}")))
}

fn to_nanos(at: OffsetDateTime) -> i64 {
    at.unix_timestamp_nanos() as i64
}

fn from_nanos(nanos: i64) -> BackendResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
        .map_err(|e| BackendError::Corrupt(format!("bad timestamp {nanos}: {e}")))
}

/// PHC string, salt and parameters included.
fn hash_password(passwords: &Argon2<'static>, password: &str) -> BackendResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| BackendError::Unavailable(format!("could not salt password: {e}")))?;

    passwords
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BackendError::Unavailable(format!("could not hash password: {e}")))
}

fn verify_password(passwords: &Argon2<'static>, password: &str, stored: &str) -> BackendResult<bool> {
    let stored = PasswordHash::new(stored)
        .map_err(|e| BackendError::Corrupt(format!("bad password hash: {e}")))?;
    Ok(passwords.verify_password(password.as_bytes(), &stored).is_ok())
}

/// Runs CPU-heavy work off the async workers.
async fn blocking<T: Send + 'static>(work: impl FnOnce() -> BackendResult<T> + Send + 'static) -> BackendResult<T> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?
}

fn random_hex() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shared SQLite-backed store. Cloned into every [`StoreClient`].
pub struct SqliteStore {
    db_pool: SqlitePool,
    inserts: broadcast::Sender<Message>,
    token_ttl: Duration,
    passwords: Argon2<'static>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, token_ttl: Duration) -> BackendResult<Arc<Self>> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        Self::from_pool(db_pool, token_ttl).await
    }

    /// Private database living as long as the store. Used by tests and demos,
    /// so passwords are hashed with the cheapest Argon2 parameters.
    pub async fn in_memory() -> BackendResult<Arc<Self>> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let passwords = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        Self::open(db_pool, Duration::hours(1), passwords).await
    }

    pub async fn from_pool(db_pool: SqlitePool, token_ttl: Duration) -> BackendResult<Arc<Self>> {
        Self::open(db_pool, token_ttl, Argon2::default()).await
    }

    async fn open(db_pool: SqlitePool, token_ttl: Duration, passwords: Argon2<'static>) -> BackendResult<Arc<Self>> {
        sqlx::raw_sql(include_res!(str, "/schema.sql"))
            .execute(&db_pool)
            .await?;

        Ok(Arc::new(SqliteStore {
            db_pool,
            inserts: broadcast::channel(FEED_CAPACITY).0,
            token_ttl,
            passwords,
        }))
    }

    /// A fresh, signed-out client.
    pub fn client(self: &Arc<Self>) -> StoreClient {
        StoreClient::new(self.clone(), None)
    }

    /// A client restored from a previously issued access token. The token is
    /// only checked on the next `current_session`.
    pub fn restore_client(self: &Arc<Self>, access_token: String) -> StoreClient {
        StoreClient::new(self.clone(), Some(access_token))
    }

    async fn create_user(&self, request: &SignUp) -> BackendResult<Identity> {
        let email = normalize_email(&request.email);
        if !email.contains('@') {
            return Err(BackendError::Rejected("Unable to validate email address: invalid format".to_owned()));
        }
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Rejected(format!("Password should be at least {MIN_PASSWORD_LEN} characters")));
        }

        let passwords = self.passwords.clone();
        let password = request.password.clone();
        let password_hash = blocking(move || hash_password(&passwords, &password)).await?;

        let mut tx = self.db_pool.begin().await?;

        if sqlx::query("SELECT 1 FROM users WHERE email=?")
            .bind(&email)
            .fetch_optional(&mut *tx)
            .await?
            .is_some() {
            return Err(BackendError::Rejected("User already registered".to_owned()));
        }

        let user_id = Uuid::now_v7();
        let now = to_nanos(OffsetDateTime::now_utc());

        sqlx::query("INSERT INTO users (id,email,password_hash,redirect_to,created_at) VALUES (?,?,?,?,?)")
            .bind(user_id.to_string())
            .bind(&email)
            .bind(&password_hash)
            .bind(&request.redirect_to)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // every identity starts with a default profile
        sqlx::query("INSERT INTO profiles (id,user_id,name,email,created_at,updated_at) VALUES (?,?,?,?,?,?)")
            .bind(Uuid::now_v7().to_string())
            .bind(user_id.to_string())
            .bind(&request.name)
            .bind(&email)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("registered {email} as {user_id}");
        Ok(Identity { id: user_id, email })
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let email = normalize_email(email);
        let rejected = || BackendError::Rejected("Invalid login credentials".to_owned());

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id,password_hash FROM users WHERE email=?")
                .bind(&email)
                .fetch_optional(&self.db_pool)
                .await?;
        let Some((id, stored)) = row else {
            return Err(rejected());
        };

        let passwords = self.passwords.clone();
        let password = password.to_owned();
        if !blocking(move || verify_password(&passwords, &password, &stored)).await? {
            return Err(rejected());
        }

        Ok(Identity { id: parse_id(&id)?, email })
    }

    async fn issue_token(&self, user: Identity) -> BackendResult<AuthSession> {
        let access_token = random_hex() + &random_hex();
        let expires_at = OffsetDateTime::now_utc() + self.token_ttl;

        sqlx::query("INSERT INTO auth_sessions (token,user_id,expires_at) VALUES (?,?,?)")
            .bind(&access_token)
            .bind(user.id.to_string())
            .bind(to_nanos(expires_at))
            .execute(&self.db_pool)
            .await?;

        Ok(AuthSession { access_token, user, expires_at })
    }

    /// The session behind `token`, if it exists and has not expired.
    /// Expired tokens are removed.
    async fn lookup_token(&self, token: &str) -> BackendResult<Option<AuthSession>> {
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT users.id,users.email,auth_sessions.expires_at FROM auth_sessions JOIN users ON users.id=auth_sessions.user_id WHERE auth_sessions.token=?",
        )
            .bind(token)
            .fetch_optional(&self.db_pool)
            .await?;

        let Some((id, email, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = from_nanos(expires_at)?;
        if expires_at <= OffsetDateTime::now_utc() {
            debug!("dropping expired token for {email}");
            self.revoke_token(token).await?;
            return Ok(None);
        }

        Ok(Some(AuthSession {
            access_token: token.to_owned(),
            user: Identity { id: parse_id(&id)?, email },
            expires_at,
        }))
    }

    async fn revoke_token(&self, token: &str) -> BackendResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE token=?")
            .bind(token)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        sqlx::query_as::<_, ProfileRow>(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id=?"))
            .bind(user_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?
            .map(Profile::try_from)
            .transpose()
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> BackendResult<()> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE profiles SET ");
        let mut set = query.separated(", ");
        for (column, value) in update.fields() {
            set.push(format!("{column}="));
            set.push_bind_unseparated(value.to_owned());
        }
        set.push("updated_at=");
        set.push_bind_unseparated(to_nanos(OffsetDateTime::now_utc()));
        query.push(" WHERE user_id=");
        query.push_bind(user_id.to_string());

        let result = query.build().execute(&self.db_pool).await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::Rejected(format!("no profile for {user_id}")));
        }

        Ok(())
    }

    async fn fetch_role(&self, user_id: Uuid) -> BackendResult<Option<Role>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT role FROM user_roles WHERE user_id=?")
            .bind(user_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(|(role,)| role.parse::<Role>().map_err(BackendError::Corrupt))
            .transpose()
    }

    async fn insert_role(&self, user_id: Uuid, role: Role) -> BackendResult<()> {
        sqlx::query("INSERT INTO user_roles (id,user_id,role) VALUES (?,?,?)")
            .bind(Uuid::now_v7().to_string())
            .bind(user_id.to_string())
            .bind(role.as_str())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn list_profiles_with_role(&self, role: Role) -> BackendResult<Vec<Profile>> {
        let columns = PROFILE_COLUMNS
            .split(',')
            .map(|column| format!("profiles.{column}"))
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {columns} FROM profiles JOIN user_roles ON user_roles.user_id=profiles.user_id WHERE user_roles.role=? ORDER BY profiles.name"
        ))
            .bind(role.as_str())
            .fetch_all(&self.db_pool)
            .await?
            .into_iter()
            .map(Profile::try_from)
            .collect()
    }

    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> BackendResult<Vec<Message>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id,sender_id,receiver_id,content,created_at,is_read FROM chat_messages WHERE (sender_id=? AND receiver_id=?) OR (sender_id=? AND receiver_id=?) ORDER BY created_at ASC, id ASC",
        )
            .bind(a.to_string())
            .bind(b.to_string())
            .bind(b.to_string())
            .bind(a.to_string())
            .fetch_all(&self.db_pool)
            .await?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }

    async fn insert_message(&self, NewMessage { sender_id, receiver_id, content }: NewMessage) -> BackendResult<Message> {
        if content.trim().is_empty() {
            return Err(BackendError::Rejected("message content must not be empty".to_owned()));
        }

        let message = Message {
            id: Uuid::now_v7(),
            sender_id,
            receiver_id,
            content,
            created_at: OffsetDateTime::now_utc(),
            is_read: false,
        };

        sqlx::query("INSERT INTO chat_messages (id,sender_id,receiver_id,content,created_at,is_read) VALUES (?,?,?,?,?,0)")
            .bind(message.id.to_string())
            .bind(message.sender_id.to_string())
            .bind(message.receiver_id.to_string())
            .bind(&message.content)
            .bind(to_nanos(message.created_at))
            .execute(&self.db_pool)
            .await?;

        debug!("message {} from {} to {}", message.id, sender_id, receiver_id);
        // no subscribers is fine
        let _ = self.inserts.send(message.clone());

        Ok(message)
    }
}

/// One application instance's connection to the store.
pub struct StoreClient {
    store: Arc<SqliteStore>,
    access_token: Mutex<Option<String>>,
    auth_tx: broadcast::Sender<AuthChange>,
}

impl StoreClient {
    fn new(store: Arc<SqliteStore>, access_token: Option<String>) -> Self {
        StoreClient {
            store,
            access_token: Mutex::new(access_token),
            auth_tx: broadcast::channel(FEED_CAPACITY).0,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn emit(&self, kind: AuthChangeKind, session: Option<AuthSession>) {
        let _ = self.auth_tx.send(AuthChange { kind, session });
    }
}

#[async_trait]
impl Backend for StoreClient {
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }

    async fn current_session(&self) -> BackendResult<Option<AuthSession>> {
        let Some(token) = self.access_token() else {
            return Ok(None);
        };

        match self.store.lookup_token(&token).await? {
            Some(session) => Ok(Some(session)),
            None => {
                self.set_access_token(None);
                self.emit(AuthChangeKind::SignedOut, None);
                Ok(None)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let user = self.store.verify_credentials(email, password).await?;
        let session = self.store.issue_token(user).await?;

        self.set_access_token(Some(session.access_token.clone()));
        self.emit(AuthChangeKind::SignedIn, Some(session.clone()));

        Ok(session)
    }

    async fn sign_up(&self, request: SignUp) -> BackendResult<SignUpOutcome> {
        let user = self.store.create_user(&request).await?;
        let session = self.store.issue_token(user.clone()).await?;

        self.set_access_token(Some(session.access_token.clone()));
        self.emit(AuthChangeKind::SignedIn, Some(session.clone()));

        Ok(SignUpOutcome { user: Some(user), session: Some(session) })
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(token) = self.access_token() {
            self.store.revoke_token(&token).await?;
        }

        self.set_access_token(None);
        self.emit(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: Uuid) -> BackendResult<Option<Profile>> {
        self.store.fetch_profile(user_id).await
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> BackendResult<()> {
        self.store.update_profile(user_id, update).await
    }

    async fn fetch_role(&self, user_id: Uuid) -> BackendResult<Option<Role>> {
        self.store.fetch_role(user_id).await
    }

    async fn insert_role(&self, user_id: Uuid, role: Role) -> BackendResult<()> {
        self.store.insert_role(user_id, role).await
    }

    async fn list_profiles_with_role(&self, role: Role) -> BackendResult<Vec<Profile>> {
        self.store.list_profiles_with_role(role).await
    }

    async fn fetch_conversation(&self, a: Uuid, b: Uuid) -> BackendResult<Vec<Message>> {
        self.store.fetch_conversation(a, b).await
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        self.store.insert_message(message).await
    }

    fn message_inserts(&self) -> broadcast::Receiver<Message> {
        self.store.inserts.subscribe()
    }
}
