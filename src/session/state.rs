use crate::db::{AuthSession, Identity, Profile, Role};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// Who is using the portal once the manager is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Anonymous,
    RolePending,
    RoleResolved(Role),
}

/// Everything the manager knows about the current user. Published whole, so a
/// reader never sees a half-applied transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub session: Option<AuthSession>,
    pub profile: Option<Profile>,
    pub role: Option<Role>,
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|session| &session.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.phase != Phase::Ready
    }

    pub fn role_pending(&self) -> bool {
        self.is_authenticated() && self.role.is_none()
    }

    pub fn status(&self) -> Status {
        match (&self.session, self.role) {
            (None, _) => Status::Anonymous,
            (Some(_), None) => Status::RolePending,
            (Some(_), Some(role)) => Status::RoleResolved(role),
        }
    }

    pub(crate) fn clear_identity(&mut self) {
        self.session = None;
        self.profile = None;
        self.role = None;
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    fn signed_in() -> SessionState {
        SessionState {
            phase: Phase::Ready,
            session: Some(AuthSession {
                access_token: "token".to_owned(),
                user: Identity { id: Uuid::now_v7(), email: "a@lendi.edu".to_owned() },
                expires_at: OffsetDateTime::now_utc(),
            }),
            profile: None,
            role: None,
        }
    }

    #[test]
    fn status_follows_identity_and_role() {
        assert_eq!(SessionState::default().status(), Status::Anonymous);
        assert!(SessionState::default().is_loading());

        let mut state = signed_in();
        assert_eq!(state.status(), Status::RolePending);
        assert!(state.role_pending());

        state.role = Some(Role::Faculty);
        assert_eq!(state.status(), Status::RoleResolved(Role::Faculty));

        state.clear_identity();
        assert_eq!(state.status(), Status::Anonymous);
        assert!(state.profile.is_none() && state.role.is_none());
        assert!(!state.is_loading());
    }
}
