//! Product model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
    pub category: String,
    pub unit: String,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product create/replace payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub unit: String,
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub project_id: Option<Uuid>,
    pub category: Option<String>,
    /// Substring of the product code or name
    pub search: Option<String>,
}
