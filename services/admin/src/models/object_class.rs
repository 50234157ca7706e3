//! Object class model: an organization-scoped classification tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ObjectClass {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub org_id: Uuid,
    pub parent_class_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewObjectClass {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parent_class_id: Option<Uuid>,
}

/// Only the descriptive fields of an object class can change
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateObjectClass {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectClassQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub org_id: Option<Uuid>,
    pub parent_class_id: Option<Uuid>,
}
