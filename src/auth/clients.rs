use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use tower_sessions::Session;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AppResult,
    backend::SqliteStore,
    chat::{AutoResponder, CannedReplies, NoReplies},
    config::Config,
    session::{ACCESS_TOKEN, CLIENT_ID, SessionManager},
};

const SIGN_IN_PATIENCE: Duration = Duration::from_secs(2);

struct Entry {
    manager: Arc<SessionManager>,
    last_seen: Instant,
}

/// One [`SessionManager`] per browser, keyed by an id kept in the browser
/// session. Entries idle for longer than the browser session itself are
/// swept on the next lookup.
#[derive(Clone)]
pub struct Clients {
    store: Arc<SqliteStore>,
    site_url: String,
    responder: Arc<dyn AutoResponder>,
    idle: Duration,
    managers: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl Clients {
    pub fn new(store: Arc<SqliteStore>, config: &Config) -> Clients {
        let responder: Arc<dyn AutoResponder> = if config.auto_reply {
            Arc::new(CannedReplies::new(config.auto_reply_delay))
        } else {
            Arc::new(NoReplies)
        };

        Clients {
            store,
            site_url: config.site_url.clone(),
            responder,
            idle: config.session_idle.unsigned_abs(),
            managers: Arc::default(),
        }
    }

    pub fn responder(&self) -> Arc<dyn AutoResponder> {
        self.responder.clone()
    }

    /// The initialized manager for this browser, created on first use. A
    /// token saved in the browser session is handed to the new manager, which
    /// validates it while initializing.
    pub async fn manager(&self, session: &Session) -> AppResult<Arc<SessionManager>> {
        let client_id = match session.get::<Uuid>(CLIENT_ID).await? {
            Some(client_id) => client_id,
            None => {
                let client_id = Uuid::now_v7();
                session.insert(CLIENT_ID, client_id).await?;
                client_id
            }
        };
        let access_token = session.get::<String>(ACCESS_TOKEN).await?;

        let now = Instant::now();
        let manager = {
            let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
            managers.retain(|client_id, entry| {
                let fresh = now.duration_since(entry.last_seen) <= self.idle;
                if !fresh {
                    debug!("evicting idle client {client_id}");
                    entry.manager.shutdown();
                }
                fresh
            });

            let entry = managers.entry(client_id).or_insert_with(|| {
                debug!("new client {client_id}");
                let client = match access_token {
                    Some(token) => self.store.restore_client(token),
                    None => self.store.client(),
                };
                Entry {
                    manager: SessionManager::new(Arc::new(client), self.site_url.clone()),
                    last_seen: now,
                }
            });
            entry.last_seen = now;
            entry.manager.clone()
        };

        manager.initialize().await;
        manager.ready().await;
        Ok(manager)
    }

    /// Saves the manager's access token in the browser session once the
    /// sign-in has reached it.
    pub async fn remember(&self, session: &Session, manager: &SessionManager) -> AppResult<()> {
        let mut state = manager.subscribe();
        let _ = tokio::time::timeout(SIGN_IN_PATIENCE, state.wait_for(|state| state.is_authenticated())).await;

        let access_token = manager.snapshot().session.map(|session| session.access_token);
        if let Some(access_token) = access_token {
            session.insert(ACCESS_TOKEN, access_token).await?;
        }
        Ok(())
    }

    /// Drops this browser's manager and clears the browser session.
    pub async fn forget(&self, session: &Session) -> AppResult<()> {
        if let Some(client_id) = session.get::<Uuid>(CLIENT_ID).await? {
            let entry = self.managers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&client_id);
            if let Some(entry) = entry {
                entry.manager.shutdown();
            }
        }
        session.clear().await;
        Ok(())
    }
}
