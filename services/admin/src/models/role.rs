//! Role model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Resource name mapped to the actions a role may perform on it
pub type Permissions = BTreeMap<String, BTreeSet<String>>;

/// Role entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role create/replace payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_deserialize_from_resource_map() {
        let payload: NewRole = serde_json::from_value(serde_json::json!({
            "name": "editor",
            "permissions": {
                "projects": ["read", "update", "read"],
                "products": ["*"]
            }
        }))
        .unwrap();

        assert_eq!(payload.description, "");
        assert_eq!(payload.permissions["projects"].len(), 2);
        assert!(payload.permissions["products"].contains("*"));
    }
}
