// src/models/user.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// The fixed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Trainer,
    Student,
}

/// Role a user holds inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Trainer,
    Student,
}

#[derive(Debug)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Trainer => "trainer",
            Role::Student => "student",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }

    /// Batch role for this user role; staff never belong to batches.
    pub fn member_role(&self) -> Option<MemberRole> {
        match self {
            Role::Trainer => Some(MemberRole::Trainer),
            Role::Student => Some(MemberRole::Student),
            Role::SuperAdmin | Role::Admin => None,
        }
    }

    /// Whether a user with this role may create, edit or delete users of `target` role.
    pub fn can_manage(&self, target: Role) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::Admin => matches!(target, Role::Trainer | Role::Student),
            Role::Trainer | Role::Student => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "super_admin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "trainer" => Ok(Role::Trainer),
            "student" => Ok(Role::Student),
            _ => Err(UnknownValue(value)),
        }
    }
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Trainer => "trainer",
            MemberRole::Student => "student",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MemberRole {
    type Error = UnknownValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "trainer" => Ok(MemberRole::Trainer),
            "student" => Ok(MemberRole::Student),
            _ => Err(UnknownValue(value)),
        }
    }
}

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,

    pub name: String,

    /// Unique login email.
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    #[sqlx(try_from = "String")]
    pub role: Role,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A batch as seen from one of its members.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchMembership {
    pub batch_id: i64,
    pub code: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub role: MemberRole,
}

/// User plus the batches the user belongs to.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub batches: Vec<BatchMembership>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email is required."))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for staff creating a user.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name length must be between 1 and 100 characters."
    ))]
    pub name: String,
    #[validate(email(message = "A valid email is required."))]
    pub email: String,
    #[validate(length(
        min = 6,
        max = 128,
        message = "Password length must be between 6 and 128 characters."
    ))]
    pub password: String,
    pub role: Role,
    /// Batches to join; ignored for staff roles.
    #[serde(default)]
    pub batches: Vec<i64>,
}

/// DTO for updating a user. Fields are optional.
/// `batches`, when present, replaces the user's whole batch set.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
    pub role: Option<Role>,
    pub batches: Option<Vec<i64>>,
}

/// Query parameters for listing users.
#[derive(Debug, Deserialize)]
pub struct UserListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Matches name or email.
    pub search: Option<String>,
    pub role: Option<Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_column_text() {
        for role in [Role::SuperAdmin, Role::Admin, Role::Trainer, Role::Student] {
            assert_eq!(Role::try_from(role.as_str().to_string()).unwrap(), role);
        }
        assert!(Role::try_from("teacher".to_string()).is_err());
    }

    #[test]
    fn staff_have_no_batch_role() {
        assert_eq!(Role::Admin.member_role(), None);
        assert_eq!(Role::SuperAdmin.member_role(), None);
        assert_eq!(Role::Trainer.member_role(), Some(MemberRole::Trainer));
        assert_eq!(Role::Student.member_role(), Some(MemberRole::Student));
    }

    #[test]
    fn admins_cannot_manage_staff() {
        assert!(Role::SuperAdmin.can_manage(Role::Admin));
        assert!(Role::SuperAdmin.can_manage(Role::SuperAdmin));
        assert!(Role::Admin.can_manage(Role::Student));
        assert!(Role::Admin.can_manage(Role::Trainer));
        assert!(!Role::Admin.can_manage(Role::Admin));
        assert!(!Role::Admin.can_manage(Role::SuperAdmin));
        assert!(!Role::Trainer.can_manage(Role::Student));
    }

    #[test]
    fn create_request_rejects_bad_email() {
        let req = CreateUserRequest {
            name: "Asha".into(),
            email: "not-an-email".into(),
            password: "secret123".into(),
            role: Role::Student,
            batches: vec![],
        };
        assert!(req.validate().is_err());
    }
}
