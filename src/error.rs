use thiserror::Error;

/// Failures surfaced by the session manager and the conversation store.
/// The `Display` text is meant to be shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Signup(String),

    /// The credential exists but no role could be attached to it.
    #[error("account created but role could not be assigned: {0}")]
    RoleAssignment(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    ProfileUpdate(String),

    #[error("failed to fetch {what}: {reason}")]
    Fetch { what: &'static str, reason: String },

    #[error("Failed to send message")]
    Send(String),
}

pub type PortalResult<T> = Result<T, PortalError>;
