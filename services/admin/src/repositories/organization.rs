//! Organization repository
//!
//! Organizations form a tree. A parent must be live and may not be the
//! organization itself or one of its descendants.

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, ensure_none, finish, like_pattern, lock_any, lock_live,
    mark_deleted, remove, user::insert_user, write_error,
};
use crate::models::{
    NewOrganization, NewUser, Organization, OrganizationQuery, OrganizationSummary, PageWindow,
    UpdateOrganization, User,
};

const ORG_COLUMNS: &str = "id, name, description, parent_id, created_by, created_at, updated_at";
const NAME_TAKEN: &str = "Organization name already exists";

const LIVE_CHILDREN: &str =
    "SELECT COUNT(*) FROM organizations WHERE parent_id = $1 AND deleted_at IS NULL";
const LIVE_MEMBERS: &str = "SELECT COUNT(*) FROM users WHERE org_id = $1 AND deleted_at IS NULL";
const LIVE_PROJECTS: &str =
    "SELECT COUNT(*) FROM projects WHERE organization_id = $1 AND deleted_at IS NULL";
const LIVE_CLASSES: &str =
    "SELECT COUNT(*) FROM object_classes WHERE org_id = $1 AND deleted_at IS NULL";

fn map_organization(row: &PgRow) -> Result<Organization, sqlx::Error> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent_id: row.try_get("parent_id")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_summary(row: &PgRow) -> Result<OrganizationSummary, sqlx::Error> {
    Ok(OrganizationSummary {
        organization: map_organization(row)?,
        user_count: row.try_get("user_count")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &OrganizationQuery) {
    builder.push(" WHERE o.deleted_at IS NULL");
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder
            .push(" AND o.name ILIKE ")
            .push_bind(like_pattern(search));
    }
    if let Some(parent_id) = query.parent_id {
        builder.push(" AND o.parent_id = ").push_bind(parent_id);
    }
}

/// Refuse dangling or cyclic parent links
async fn check_parent(
    conn: &mut PgConnection,
    id: Option<Uuid>,
    parent_id: Uuid,
) -> RepositoryResult<()> {
    if id == Some(parent_id) {
        return Err(RepositoryError::Invalid(
            "An organization cannot be its own parent".to_string(),
        ));
    }

    let live: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL)",
    )
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await?;
    if !live {
        return Err(RepositoryError::Invalid(
            "Parent organization does not exist".to_string(),
        ));
    }

    if let Some(id) = id {
        // Walk up from the new parent; meeting `id` means a cycle
        let cyclic: bool = sqlx::query_scalar(
            r#"
            WITH RECURSIVE ancestors AS (
                SELECT id, parent_id FROM organizations WHERE id = $1
                UNION
                SELECT o.id, o.parent_id
                FROM organizations o
                JOIN ancestors a ON o.id = a.parent_id
            )
            SELECT EXISTS(SELECT 1 FROM ancestors WHERE id = $2)
            "#,
        )
        .bind(parent_id)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        if cyclic {
            return Err(RepositoryError::Invalid(
                "An organization cannot be moved under its own descendant".to_string(),
            ));
        }
    }

    Ok(())
}

async fn insert_organization(
    conn: &mut PgConnection,
    org: &NewOrganization,
    created_by: Uuid,
) -> RepositoryResult<Organization> {
    if let Some(parent_id) = org.parent_id {
        check_parent(conn, None, parent_id).await?;
    }

    let sql = format!(
        "INSERT INTO organizations (id, name, description, parent_id, created_by) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {}",
        ORG_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(&org.name)
        .bind(&org.description)
        .bind(org.parent_id)
        .bind(created_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| write_error(e, NAME_TAKEN))?;
    Ok(map_organization(&row)?)
}

async fn apply_update(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &UpdateOrganization,
) -> RepositoryResult<Organization> {
    lock_live(conn, "organizations", id, "Organization not found").await?;
    if let Some(Some(parent_id)) = changes.parent_id {
        check_parent(conn, Some(id), parent_id).await?;
    }

    let sql = format!(
        r#"
        UPDATE organizations SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            parent_id = CASE WHEN $5 THEN $4 ELSE parent_id END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        ORG_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.parent_id.flatten())
        .bind(changes.parent_id.is_some())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| write_error(e, NAME_TAKEN))?;
    Ok(map_organization(&row)?)
}

/// Live dependents block deletion
async fn ensure_no_dependents(conn: &mut PgConnection, id: Uuid) -> RepositoryResult<()> {
    ensure_none(conn, LIVE_CHILDREN, id, "Organization has child organizations").await?;
    ensure_none(conn, LIVE_MEMBERS, id, "Organization still has member users").await?;
    ensure_none(conn, LIVE_PROJECTS, id, "Organization still has projects").await?;
    ensure_none(conn, LIVE_CLASSES, id, "Organization still has object classes").await
}

#[derive(Clone)]
pub struct OrganizationRepository {
    pool: PgPool,
}

impl OrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an organization together with its default admin user.
    ///
    /// Both rows are written in one transaction: if the admin insert fails
    /// the organization is rolled back too. `admin.org_id` is overwritten
    /// with the new organization's id.
    pub async fn create_with_admin(
        &self,
        org: &NewOrganization,
        created_by: Uuid,
        admin: NewUser,
    ) -> RepositoryResult<(Organization, User)> {
        info!("Creating organization {} with admin {}", org.name, admin.username);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<(Organization, User)> = async {
            let organization = insert_organization(&mut tx, org, created_by).await?;
            let admin = NewUser {
                org_id: Some(organization.id),
                ..admin
            };
            let user = insert_user(&mut tx, &admin).await?;
            Ok((organization, user))
        }
        .await;
        finish(tx, result).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Organization>> {
        let sql = format!(
            "SELECT {} FROM organizations WHERE id = $1 AND deleted_at IS NULL",
            ORG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_organization).transpose()?)
    }

    pub async fn exists(&self, id: Uuid) -> RepositoryResult<bool> {
        let exists = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn name_taken(&self, name: &str, except: Option<Uuid>) -> RepositoryResult<bool> {
        let taken = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM organizations
                WHERE name = $1 AND deleted_at IS NULL
                  AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(name)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    /// One page of live organizations with their member counts
    pub async fn list(
        &self,
        query: &OrganizationQuery,
        window: PageWindow,
    ) -> RepositoryResult<(Vec<OrganizationSummary>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM organizations o");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(
            "SELECT o.id, o.name, o.description, o.parent_id, o.created_by, o.created_at, \
             o.updated_at, (SELECT COUNT(*) FROM users u \
             WHERE u.org_id = o.id AND u.deleted_at IS NULL) AS user_count \
             FROM organizations o",
        );
        push_filters(&mut select, query);
        select
            .push(" ORDER BY o.created_at DESC, o.id LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let organizations = rows
            .iter()
            .map(map_summary)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((organizations, total))
    }

    pub async fn update(
        &self,
        id: Uuid,
        changes: &UpdateOrganization,
    ) -> RepositoryResult<Organization> {
        info!("Updating organization: {}", id);

        let mut tx = self.pool.begin().await?;
        let result = apply_update(&mut tx, id, changes).await;
        finish(tx, result).await
    }

    /// Soft-delete an organization that has no live dependents.
    ///
    /// The row lock makes concurrent inserts referencing this organization
    /// wait until the check and the delete have committed.
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting organization: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "organizations", id, "Organization not found").await?;
            ensure_no_dependents(&mut tx, id).await?;
            mark_deleted(&mut tx, "organizations", id).await
        }
        .await;
        finish(tx, result).await
    }

    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging organization: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "organizations", id, "Organization not found").await?;
            ensure_no_dependents(&mut tx, id).await?;
            remove(&mut tx, "organizations", id).await
        }
        .await;
        finish(tx, result).await
    }
}
