//! Role repository

use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow, types::Json};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, ensure_none, finish, like_pattern, lock_any, lock_live,
    mark_deleted, remove, write_error,
};
use crate::models::{NewRole, PageWindow, Permissions, Role, RoleQuery};

const ROLE_COLUMNS: &str = "id, name, description, permissions, created_at, updated_at";
const NAME_TAKEN: &str = "Role name already exists";
const LINKED_USERS: &str = r#"
    SELECT COUNT(*) FROM user_roles ur
    JOIN users u ON u.id = ur.user_id
    WHERE ur.role_id = $1 AND u.deleted_at IS NULL
"#;

fn map_role(row: &PgRow) -> Result<Role, sqlx::Error> {
    let permissions: Json<Permissions> = row.try_get("permissions")?;
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        permissions: permissions.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &RoleQuery) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[derive(Clone)]
pub struct RoleRepository {
    pool: PgPool,
}

impl RoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, role: &NewRole) -> RepositoryResult<Role> {
        info!("Creating role: {}", role.name);

        let sql = format!(
            "INSERT INTO roles (id, name, description, permissions) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            ROLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&role.name)
            .bind(&role.description)
            .bind(Json(&role.permissions))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, NAME_TAKEN))?;
        Ok(map_role(&row)?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Role>> {
        let sql = format!(
            "SELECT {} FROM roles WHERE id = $1 AND deleted_at IS NULL",
            ROLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_role).transpose()?)
    }

    pub async fn name_taken(&self, name: &str, except: Option<Uuid>) -> RepositoryResult<bool> {
        let taken = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM roles
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

    pub async fn list(&self, query: &RoleQuery, window: PageWindow) -> RepositoryResult<(Vec<Role>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM roles");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM roles", ROLE_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY name LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let roles = rows.iter().map(map_role).collect::<Result<Vec<_>, _>>()?;
        Ok((roles, total))
    }

    /// Live roles granted to a user
    pub async fn for_user(&self, user_id: Uuid) -> RepositoryResult<Vec<Role>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.description, r.permissions, r.created_at, r.updated_at
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.deleted_at IS NULL
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(map_role).collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace name, description and permissions
    pub async fn update(&self, id: Uuid, role: &NewRole) -> RepositoryResult<Role> {
        info!("Updating role: {}", id);

        let sql = format!(
            r#"
            UPDATE roles SET name = $2, description = $3, permissions = $4, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            ROLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(Json(&role.permissions))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| write_error(e, NAME_TAKEN))?
            .ok_or_else(|| RepositoryError::NotFound("Role not found".to_string()))?;
        Ok(map_role(&row)?)
    }

    /// Soft-delete a role no live user holds
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting role: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "roles", id, "Role not found").await?;
            ensure_none(&mut tx, LINKED_USERS, id, "Role is still assigned to users").await?;
            mark_deleted(&mut tx, "roles", id).await
        }
        .await;
        finish(tx, result).await
    }

    /// Remove a role for good; links to deleted users go with it
    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging role: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "roles", id, "Role not found").await?;
            ensure_none(&mut tx, LINKED_USERS, id, "Role is still assigned to users").await?;
            remove(&mut tx, "roles", id).await
        }
        .await;
        finish(tx, result).await
    }
}
