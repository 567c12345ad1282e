use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use time::OffsetDateTime;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{Backend, SignUp},
    db::{AuthSession, ProfileUpdate, Role},
    error::{PortalError, PortalResult},
};

use super::state::{Phase, SessionState};

/// `LENDI` + year + three random digits. Not checked for collisions.
pub fn student_id(year: i32) -> String {
    format!("LENDI{year}{:03}", rand::random_range(0..1000u32))
}

/// Single owner of "who is using the portal, and as what".
///
/// Only the manager writes the state; readers get it through [`subscribe`]
/// or [`snapshot`]. Profile and role are filled in after the identity,
/// by a task spawned off the auth-change handler, so there is a window where
/// the identity is known and the role is not.
///
/// [`subscribe`]: SessionManager::subscribe
/// [`snapshot`]: SessionManager::snapshot
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    site_url: String,
    state: watch::Sender<SessionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, site_url: impl Into<String>) -> Arc<Self> {
        Arc::new(SessionManager {
            backend,
            site_url: site_url.into(),
            state: watch::channel(SessionState::default()).0,
            listener: Mutex::new(None),
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Starts listening for auth changes, then restores any existing session.
    /// Calling it again is a no-op.
    pub async fn initialize(self: &Arc<Self>) {
        let first = self.state.send_if_modified(|state| {
            if state.phase != Phase::Uninitialized {
                return false;
            }
            state.phase = Phase::Loading;
            true
        });
        if !first {
            return;
        }

        // register before asking, so nothing between the two is missed
        let mut changes = self.backend.auth_changes();
        let manager = Arc::downgrade(self);
        let listener = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("missed {skipped} auth changes");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };

                debug!("auth change: {:?}", change.kind);
                manager.apply_session(change.session);
            }
        });
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);

        match self.backend.current_session().await {
            Ok(session) => self.apply_session(session),
            Err(e) => warn!("could not restore session, continuing signed out: {e}"),
        }

        self.state.send_modify(|state| state.phase = Phase::Ready);
    }

    /// Resolves once `initialize` has finished.
    pub async fn ready(&self) {
        let _ = self.subscribe().wait_for(|state| state.phase == Phase::Ready).await;
    }

    /// The role, waiting up to `patience` for a pending one to resolve.
    pub async fn resolved_role(&self, patience: Duration) -> Option<Role> {
        let mut state = self.subscribe();
        let settled = tokio::time::timeout(patience, state.wait_for(|state| !state.role_pending()))
            .await
            .is_ok();
        if !settled {
            debug!("role still pending after {patience:?}");
        }
        self.state.borrow().role
    }

    /// Records a new session (or its absence) and schedules the profile and
    /// role fetch. Never blocks on the backend.
    fn apply_session(self: &Arc<Self>, session: Option<AuthSession>) {
        let user_id = session.as_ref().map(|session| session.user.id);

        self.state.send_modify(|state| {
            let same_user = state.identity().map(|identity| identity.id) == user_id;
            if session.is_none() {
                state.clear_identity();
                return;
            }
            state.session = session;
            if !same_user {
                state.profile = None;
                state.role = None;
            }
        });

        if let Some(user_id) = user_id {
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.load_profile_and_role(user_id).await {
                    warn!("{e}");
                }
            });
        }
    }

    /// Fetches profile and role for `user_id` and applies whatever arrived,
    /// unless the user has changed in the meantime.
    async fn load_profile_and_role(&self, user_id: Uuid) -> PortalResult<()> {
        let (profile, role) = tokio::join!(
            self.backend.fetch_profile(user_id),
            self.backend.fetch_role(user_id),
        );

        self.state.send_if_modified(|state| {
            if state.identity().map(|identity| identity.id) != Some(user_id) {
                debug!("discarding profile of {user_id}, no longer signed in");
                return false;
            }

            let mut changed = false;
            if let Ok(Some(profile)) = &profile {
                changed |= state.profile.as_ref() != Some(profile);
                state.profile = Some(profile.clone());
            }
            if let Ok(Some(role)) = &role {
                changed |= state.role != Some(*role);
                state.role = Some(*role);
            }
            changed
        });

        if let Err(e) = profile {
            return Err(PortalError::Fetch { what: "profile", reason: e.to_string() });
        }
        if let Err(e) = role {
            return Err(PortalError::Fetch { what: "role", reason: e.to_string() });
        }
        Ok(())
    }

    /// Signs in. The new identity, profile and role reach the state through
    /// the auth-change listener, not through this call.
    pub async fn login(&self, email: &str, password: &str) -> PortalResult<()> {
        match self.backend.sign_in(email, password).await {
            Ok(session) => {
                info!("welcome {}", session.user.email);
                Ok(())
            }
            Err(e) => {
                debug!("login for {email} refused: {e}");
                Err(PortalError::Authentication(e.to_string()))
            }
        }
    }

    /// Creates the credential, then attaches the role and the initial profile
    /// fields. A failed role write leaves the credential in place.
    pub async fn signup(self: &Arc<Self>, email: &str, password: &str, name: &str, role: Role) -> PortalResult<()> {
        let outcome = self.backend
            .sign_up(SignUp {
                email: email.to_owned(),
                password: password.to_owned(),
                name: name.to_owned(),
                redirect_to: self.site_url.clone(),
            })
            .await
            .map_err(|e| PortalError::Signup(e.to_string()))?;

        let Some(user) = outcome.user else {
            return Ok(());
        };

        if let Err(e) = self.backend.insert_role(user.id, role).await {
            warn!("{} has a credential but no role: {e}", user.email);
            return Err(PortalError::RoleAssignment(e.to_string()));
        }

        let mut update = ProfileUpdate {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        if role == Role::Student {
            update.student_id = Some(student_id(OffsetDateTime::now_utc().year()));
        }
        if let Err(e) = self.backend.update_profile(user.id, &update).await {
            warn!("initial profile for {} not written: {e}", user.email);
        }

        info!("signed up {} as {role}", user.email);

        // fetch again now that role and profile are written
        if outcome.session.is_some() {
            self.apply_session(outcome.session);
        }
        Ok(())
    }

    /// Ends the session. Local state is cleared in one step even if the
    /// backend call fails.
    pub async fn logout(&self) {
        if let Err(e) = self.backend.sign_out().await {
            warn!("sign out failed: {e}");
        }
        self.state.send_modify(SessionState::clear_identity);
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> PortalResult<()> {
        let Some(user_id) = self.state.borrow().identity().map(|identity| identity.id) else {
            return Err(PortalError::NotAuthenticated);
        };

        self.backend
            .update_profile(user_id, &update)
            .await
            .map_err(|e| PortalError::ProfileUpdate(e.to_string()))?;

        match self.backend.fetch_profile(user_id).await {
            Ok(Some(profile)) => {
                self.state.send_if_modified(|state| {
                    if state.identity().map(|identity| identity.id) != Some(user_id) {
                        return false;
                    }
                    state.profile = Some(profile);
                    true
                });
            }
            Ok(None) => warn!("profile of {user_id} vanished after update"),
            Err(e) => warn!("could not reload profile of {user_id}: {e}"),
        }
        Ok(())
    }

    pub async fn refresh_profile(&self) -> PortalResult<()> {
        let user_id = self.state.borrow().identity().map(|identity| identity.id);
        match user_id {
            Some(user_id) => self.load_profile_and_role(user_id).await,
            None => Ok(()),
        }
    }

    /// Stops listening for auth changes.
    pub fn shutdown(&self) {
        if let Some(listener) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            listener.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
