//! Entities and request/response payloads

pub mod object_class;
pub mod organization;
pub mod product;
pub mod project;
pub mod role;
pub mod user;

use serde::{Deserialize, Deserializer, Serialize};

pub use object_class::{NewObjectClass, ObjectClass, ObjectClassQuery, UpdateObjectClass};
pub use organization::{
    NewOrganization, Organization, OrganizationQuery, OrganizationSummary, UpdateOrganization,
};
pub use product::{NewProduct, Product, ProductQuery};
pub use project::{NewProject, Project, ProjectQuery};
pub use role::{NewRole, Permissions, Role, RoleQuery};
pub use user::{
    CreateUserRequest, LoginRequest, NewUser, RegisterRequest, ResetPasswordRequest,
    UpdateProfileRequest, UpdateUserRequest, User, UserChanges, UserDetail, UserQuery, UserRole,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Tell an absent field (`None`) from an explicit `null` (`Some(None)`).
/// Use together with `#[serde(default)]`.
pub(crate) fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 1-based page position clamped to sane bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub page_size: u32,
}

impl PageWindow {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// Paginated listing envelope
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(window: PageWindow, total: i64, data: Vec<T>) -> Self {
        Self {
            total,
            page: window.page,
            page_size: window.page_size,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_defaults() {
        let window = PageWindow::new(None, None);
        assert_eq!(window.page, 1);
        assert_eq!(window.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn test_page_window_clamps_out_of_range_values() {
        let window = PageWindow::new(Some(0), Some(10_000));
        assert_eq!(window.page, 1);
        assert_eq!(window.page_size, MAX_PAGE_SIZE);

        let window = PageWindow::new(Some(3), Some(0));
        assert_eq!(window.page_size, 1);
        assert_eq!(window.offset(), 2);
    }

    #[test]
    fn test_page_window_offset() {
        let window = PageWindow::new(Some(4), Some(25));
        assert_eq!(window.limit(), 25);
        assert_eq!(window.offset(), 75);
    }

    #[test]
    fn test_absent_and_null_references_differ() {
        let parent = uuid::Uuid::new_v4();

        let keep: UpdateOrganization = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(keep.parent_id, None);

        let clear: UpdateOrganization =
            serde_json::from_value(serde_json::json!({ "parent_id": null })).unwrap();
        assert_eq!(clear.parent_id, Some(None));

        let set: UpdateOrganization =
            serde_json::from_value(serde_json::json!({ "parent_id": parent })).unwrap();
        assert_eq!(set.parent_id, Some(Some(parent)));

        let detach: UpdateUserRequest =
            serde_json::from_value(serde_json::json!({ "org_id": null })).unwrap();
        assert_eq!(detach.org_id, Some(None));
    }
}
