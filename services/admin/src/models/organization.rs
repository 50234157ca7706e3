//! Organization (tenant) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the tenant hierarchy
#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub parent_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing row: the organization plus its live member count
#[derive(Debug, Serialize)]
pub struct OrganizationSummary {
    #[serde(flatten)]
    pub organization: Organization,
    pub user_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Absent keeps the parent, `null` makes the organization a root
    #[serde(default, deserialize_with = "super::explicit_null")]
    pub parent_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub parent_id: Option<Uuid>,
}
