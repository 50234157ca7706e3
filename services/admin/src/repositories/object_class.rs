//! Object class repository
//!
//! Classes belong to one organization and may nest under a parent class of
//! the same organization.

use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, ensure_none, finish, lock_any, lock_live, mark_deleted,
    remove, write_error,
};
use crate::models::{NewObjectClass, ObjectClass, ObjectClassQuery, PageWindow, UpdateObjectClass};

const CLASS_COLUMNS: &str =
    "id, name, description, org_id, parent_class_id, created_by, created_at, updated_at";
const LIVE_SUBCLASSES: &str =
    "SELECT COUNT(*) FROM object_classes WHERE parent_class_id = $1 AND deleted_at IS NULL";
const ALL_SUBCLASSES: &str = "SELECT COUNT(*) FROM object_classes WHERE parent_class_id = $1";

fn map_class(row: &PgRow) -> Result<ObjectClass, sqlx::Error> {
    Ok(ObjectClass {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        org_id: row.try_get("org_id")?,
        parent_class_id: row.try_get("parent_class_id")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &ObjectClassQuery) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(org_id) = query.org_id {
        builder.push(" AND org_id = ").push_bind(org_id);
    }
    if let Some(parent_class_id) = query.parent_class_id {
        builder
            .push(" AND parent_class_id = ")
            .push_bind(parent_class_id);
    }
}

#[derive(Clone)]
pub struct ObjectClassRepository {
    pool: PgPool,
}

impl ObjectClassRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a class in `org_id` on behalf of `created_by`
    pub async fn create(
        &self,
        org_id: Uuid,
        created_by: Uuid,
        class: &NewObjectClass,
    ) -> RepositoryResult<ObjectClass> {
        info!("Creating object class {} in organization {}", class.name, org_id);

        if let Some(parent_class_id) = class.parent_class_id {
            let same_org: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM object_classes
                    WHERE id = $1 AND org_id = $2 AND deleted_at IS NULL
                )
                "#,
            )
            .bind(parent_class_id)
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
            if !same_org {
                return Err(RepositoryError::Invalid(
                    "Parent class does not exist in this organization".to_string(),
                ));
            }
        }

        let sql = format!(
            r#"
            INSERT INTO object_classes (id, name, description, org_id, parent_class_id, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            CLASS_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&class.name)
            .bind(&class.description)
            .bind(org_id)
            .bind(class.parent_class_id)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, "Object class already exists"))?;
        Ok(map_class(&row)?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<ObjectClass>> {
        let sql = format!(
            "SELECT {} FROM object_classes WHERE id = $1 AND deleted_at IS NULL",
            CLASS_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_class).transpose()?)
    }

    pub async fn list(
        &self,
        query: &ObjectClassQuery,
        window: PageWindow,
    ) -> RepositoryResult<(Vec<ObjectClass>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM object_classes");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::new(format!("SELECT {} FROM object_classes", CLASS_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY name, id LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let classes = rows.iter().map(map_class).collect::<Result<Vec<_>, _>>()?;
        Ok((classes, total))
    }

    pub async fn update(
        &self,
        id: Uuid,
        changes: &UpdateObjectClass,
    ) -> RepositoryResult<ObjectClass> {
        info!("Updating object class: {}", id);

        let sql = format!(
            r#"
            UPDATE object_classes SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            CLASS_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(changes.name.as_deref())
            .bind(changes.description.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Object class not found".to_string()))?;
        Ok(map_class(&row)?)
    }

    /// Soft-delete a class without live subclasses
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting object class: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "object_classes", id, "Object class not found").await?;
            ensure_none(&mut tx, LIVE_SUBCLASSES, id, "Object class has subclasses").await?;
            mark_deleted(&mut tx, "object_classes", id).await
        }
        .await;
        finish(tx, result).await
    }

    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging object class: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "object_classes", id, "Object class not found").await?;
            ensure_none(&mut tx, ALL_SUBCLASSES, id, "Object class has subclasses").await?;
            remove(&mut tx, "object_classes", id).await
        }
        .await;
        finish(tx, result).await
    }
}
