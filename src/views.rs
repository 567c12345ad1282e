//! Picks between the student and faculty rendering of a shared page.

use std::time::Duration;

use crate::db::Role;

/// How long a page waits for a pending role before falling back.
pub const ROLE_PATIENCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    StudentCorner,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Student,
    Faculty,
}

/// An unresolved role gets the student variant.
pub fn select(role: Option<Role>) -> Variant {
    match role {
        Some(Role::Faculty) => Variant::Faculty,
        Some(Role::Student) | None => Variant::Student,
    }
}

impl Page {
    pub fn path(&self) -> &'static str {
        use Page::*;
        match self {
            Dashboard => "/dashboard",
            StudentCorner => "/student-corner",
            Chat => "/chat",
        }
    }

    pub fn title(&self, variant: Variant) -> &'static str {
        use Page::*;
        use Variant::*;
        match (self, variant) {
            (Dashboard, Student) => "Student Dashboard",
            (Dashboard, Faculty) => "Faculty Dashboard",
            (StudentCorner, Student) => "My Profile",
            (StudentCorner, Faculty) => "Student Directory",
            (Chat, Student) => "Message your faculty members",
            (Chat, Faculty) => "Message your students",
        }
    }
}

impl Variant {
    /// Who shows up in this variant's contact list.
    pub fn contact_role(&self) -> Role {
        match self {
            Variant::Student => Role::Faculty,
            Variant::Faculty => Role::Student,
        }
    }

    pub fn contact_noun(&self) -> &'static str {
        match self {
            Variant::Student => "a faculty member",
            Variant::Faculty => "a student",
        }
    }
}
