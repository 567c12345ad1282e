use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Student => "student",
            Faculty => "faculty",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// The authenticated principal. `id` is issued by the store at signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: Identity,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,

    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar_url: Option<String>,

    pub student_id: Option<String>,
    pub department: Option<String>,
    pub batch: Option<String>,
    pub semester: Option<String>,
    pub section: Option<String>,
    pub designation: Option<String>,

    pub date_of_birth: Option<String>,
    pub blood_group: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,

    // unique: user_id
}

/// Partial write to a profile row. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar_url: Option<String>,

    pub student_id: Option<String>,
    pub department: Option<String>,
    pub batch: Option<String>,
    pub semester: Option<String>,
    pub section: Option<String>,
    pub designation: Option<String>,

    pub date_of_birth: Option<String>,
    pub blood_group: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
}

impl ProfileUpdate {
    /// Forgets fields that are empty after trimming. A submitted form carries
    /// every input, filled in or not.
    pub fn without_blanks(mut self) -> Self {
        let slots = [
            &mut self.name,
            &mut self.phone,
            &mut self.address,
            &mut self.avatar_url,
            &mut self.student_id,
            &mut self.department,
            &mut self.batch,
            &mut self.semester,
            &mut self.section,
            &mut self.designation,
            &mut self.date_of_birth,
            &mut self.blood_group,
            &mut self.guardian_name,
            &mut self.guardian_phone,
        ];
        for slot in slots {
            if slot.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *slot = None;
            }
        }
        self
    }

    /// Column/value pairs for the fields that are present.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("name", &self.name),
            ("phone", &self.phone),
            ("address", &self.address),
            ("avatar_url", &self.avatar_url),
            ("student_id", &self.student_id),
            ("department", &self.department),
            ("batch", &self.batch),
            ("semester", &self.semester),
            ("section", &self.section),
            ("designation", &self.designation),
            ("date_of_birth", &self.date_of_birth),
            ("blood_group", &self.blood_group),
            ("guardian_name", &self.guardian_name),
            ("guardian_phone", &self.guardian_phone),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_deref().map(|value| (column, value)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,

    pub content: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    // never written by any operation yet
    pub is_read: bool,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_only_reports_present_fields() {
        let update = ProfileUpdate {
            name: Some("Ravi Kumar".to_owned()),
            blood_group: Some("O+".to_owned()),
            ..Default::default()
        };

        assert_eq!(update.fields(), vec![("name", "Ravi Kumar"), ("blood_group", "O+")]);
        assert!(ProfileUpdate::default().fields().is_empty());
    }

    #[test]
    fn blank_form_fields_are_not_written() {
        let submitted: ProfileUpdate = serde_json::from_str(
            r#"{"phone":"","address":"  ","department":"CSE","guardian_name":""}"#,
        )
        .unwrap();
        assert_eq!(submitted.fields().len(), 4);

        let update = submitted.without_blanks();
        assert_eq!(update.fields(), vec![("department", "CSE")]);
    }

    #[test]
    fn message_pair_matching_is_unordered() {
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let msg = Message {
            id: Uuid::now_v7(),
            sender_id: b,
            receiver_id: a,
            content: "hi".to_owned(),
            created_at: OffsetDateTime::now_utc(),
            is_read: false,
        };

        assert!(msg.is_between(a, b));
        assert!(msg.is_between(b, a));
        assert!(!msg.is_between(a, c));
    }

    #[test]
    fn roles_parse_and_serialize_lowercase() {
        assert_eq!("faculty".parse::<Role>(), Ok(Role::Faculty));
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
    }
}
