//! Application state shared across handlers

use sqlx::PgPool;

use crate::{
    audit::AuditLogger,
    identity::IdentityResolver,
    password::PasswordHasher,
    repositories::{
        ObjectClassRepository, OrganizationRepository, ProductRepository, ProjectRepository,
        RoleRepository, UserRepository,
    },
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub resolver: IdentityResolver,
    pub hasher: PasswordHasher,
    pub audit: AuditLogger,
    /// Login page for unauthenticated browsers in session mode
    pub login_redirect: Option<String>,
    pub user_repository: UserRepository,
    pub role_repository: RoleRepository,
    pub organization_repository: OrganizationRepository,
    pub project_repository: ProjectRepository,
    pub product_repository: ProductRepository,
    pub object_class_repository: ObjectClassRepository,
}

impl AppState {
    pub fn new(
        db_pool: PgPool,
        resolver: IdentityResolver,
        hasher: PasswordHasher,
        login_redirect: Option<String>,
    ) -> Self {
        Self {
            audit: AuditLogger::new(db_pool.clone()),
            user_repository: UserRepository::new(db_pool.clone()),
            role_repository: RoleRepository::new(db_pool.clone()),
            organization_repository: OrganizationRepository::new(db_pool.clone()),
            project_repository: ProjectRepository::new(db_pool.clone()),
            product_repository: ProductRepository::new(db_pool.clone()),
            object_class_repository: ObjectClassRepository::new(db_pool.clone()),
            db_pool,
            resolver,
            hasher,
            login_redirect,
        }
    }
}
