use serde::Serialize;
use uuid::Uuid;

use crate::{
    backend::Backend,
    db::{Profile, Role},
    error::{PortalError, PortalResult},
    views,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department: String,
}

impl From<Profile> for Contact {
    fn from(profile: Profile) -> Self {
        Contact {
            id: profile.user_id,
            name: profile.name,
            email: profile.email,
            department: profile.department.unwrap_or_default(),
        }
    }
}

impl Contact {
    /// Case-insensitive match on name or department. An empty query matches.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        self.name.to_lowercase().contains(&query) || self.department.to_lowercase().contains(&query)
    }

    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .collect()
    }
}

/// Who a user with `role` may talk to: students see faculty and the other way
/// round. Filtered by `query`.
pub async fn contacts_for(backend: &dyn Backend, role: Option<Role>, query: &str) -> PortalResult<Vec<Contact>> {
    let wanted = views::select(role).contact_role();
    let profiles = backend
        .list_profiles_with_role(wanted)
        .await
        .map_err(|e| PortalError::Fetch { what: "contacts", reason: e.to_string() })?;

    Ok(profiles
        .into_iter()
        .map(Contact::from)
        .filter(|contact| contact.matches(query))
        .collect())
}

pub async fn find_contact(backend: &dyn Backend, role: Option<Role>, id: Uuid) -> PortalResult<Option<Contact>> {
    Ok(contacts_for(backend, role, "")
        .await?
        .into_iter()
        .find(|contact| contact.id == id))
}
