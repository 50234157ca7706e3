//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::Role;

/// Coarse role label carried in tokens and sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "user" => Ok(UserRole::User),
            other => Err(format!("unknown user role '{}'", other)),
        }
    }
}

/// User entity
///
/// The password digest is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub is_active: bool,
    pub role: UserRole,
    pub org_id: Option<Uuid>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with the roles granted to them
#[derive(Debug, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<Role>,
}

/// Insert payload; `password_hash` is already a digest
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub is_active: bool,
    pub role: UserRole,
    pub org_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// Column changes applied by an update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub role: Option<UserRole>,
    /// `Some(None)` detaches the user from its organization
    pub org_id: Option<Option<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Admin-initiated user creation
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub role: UserRole,
    pub org_id: Option<Uuid>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub role: Option<UserRole>,
    /// Absent keeps the organization, `null` clears it
    #[serde(default, deserialize_with = "super::explicit_null")]
    pub org_id: Option<Option<Uuid>>,
    pub role_ids: Option<Vec<Uuid>>,
}

/// Self-service profile update
#[derive(Debug, Deserialize, Default)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

/// Filters for the user listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Substring of username, email or full name
    pub search: Option<String>,
    pub org_id: Option<Uuid>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            email: "alice@example.com".to_string(),
            full_name: "Alice".to_string(),
            phone: String::new(),
            is_active: true,
            role: UserRole::User,
            org_id: None,
            last_login_at: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_password_hash_is_never_serialized() {
        let json = serde_json::to_value(sample_user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(!json.to_string().contains("argon2"));
        assert_eq!(json["username"], "alice");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_user_detail_flattens_user_fields() {
        let detail = UserDetail {
            user: sample_user(),
            roles: vec![],
        };
        let json = serde_json::to_value(detail).unwrap();
        assert_eq!(json["username"], "alice");
        assert!(json["roles"].as_array().unwrap().is_empty());
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_user_role_parsing() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert_eq!("user".parse::<UserRole>().unwrap(), UserRole::User);
        assert!("root".parse::<UserRole>().is_err());
        assert_eq!(UserRole::default(), UserRole::User);
    }
}
