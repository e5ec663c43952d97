//! Roles and record audiences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The role a signed-in user holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructors: see everything, bypass every lock, may edit.
    Admin,
    /// Trainees: see records addressed to them, subject to locks.
    Student,
}

impl Role {
    /// All roles, in display order.
    pub const ALL: [Self; 2] = [Self::Admin, Self::Student];

    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
        }
    }

    /// Returns true for the admin role.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "student" => Ok(Self::Student),
            _ => Err(ValidationError::InvalidRole {
                value: s.to_string(),
            }),
        }
    }
}

/// The audience a record is addressed to (`assignedTo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    /// Only admins.
    Admin,
    /// Students (admins see it regardless).
    Student,
    /// Everyone.
    #[default]
    All,
}

impl Audience {
    /// All audiences, in display order.
    pub const ALL: [Self; 3] = [Self::Admin, Self::Student, Self::All];

    /// Returns the wire name of the audience.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
            Self::All => "all",
        }
    }

    /// Returns true if a record with this audience is addressed to `role`.
    ///
    /// This is addressing only; admins additionally see every record.
    #[must_use]
    pub const fn includes(self, role: Role) -> bool {
        matches!(
            (self, role),
            (Self::All, _) | (Self::Admin, Role::Admin) | (Self::Student, Role::Student)
        )
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "student" => Ok(Self::Student),
            "all" => Ok(Self::All),
            _ => Err(ValidationError::InvalidAudience {
                value: s.to_string(),
            }),
        }
    }
}

impl From<Role> for Audience {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => Self::Admin,
            Role::Student => Self::Student,
        }
    }
}
