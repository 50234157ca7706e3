//! Project repository

use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, ensure_none, finish, lock_any, lock_live, mark_deleted,
    remove, write_error,
};
use crate::models::{NewProject, PageWindow, Project, ProjectQuery};

const PROJECT_COLUMNS: &str = "id, name, description, start_date, end_date, status, \
     organization_id, created_at, updated_at";
const LIVE_PRODUCTS: &str =
    "SELECT COUNT(*) FROM products WHERE project_id = $1 AND deleted_at IS NULL";
const MISSING_ORG: &str = "Organization does not exist";

fn map_project(row: &PgRow) -> Result<Project, sqlx::Error> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        status: row.try_get("status")?,
        organization_id: row.try_get("organization_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &ProjectQuery) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(organization_id) = query.organization_id {
        builder
            .push(" AND organization_id = ")
            .push_bind(organization_id);
    }
    if let Some(status) = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder.push(" AND status = ").push_bind(status.to_string());
    }
}

#[derive(Clone)]
pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn organization_is_live(&self, organization_id: Uuid) -> RepositoryResult<bool> {
        let live = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(live)
    }

    pub async fn create(&self, project: &NewProject) -> RepositoryResult<Project> {
        info!("Creating project: {}", project.name);

        if !self.organization_is_live(project.organization_id).await? {
            return Err(RepositoryError::Invalid(MISSING_ORG.to_string()));
        }

        let sql = format!(
            r#"
            INSERT INTO projects (id, name, description, start_date, end_date, status, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.start_date)
            .bind(project.end_date)
            .bind(&project.status)
            .bind(project.organization_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, "Project already exists"))?;
        Ok(map_project(&row)?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE id = $1 AND deleted_at IS NULL",
            PROJECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_project).transpose()?)
    }

    pub async fn list(
        &self,
        query: &ProjectQuery,
        window: PageWindow,
    ) -> RepositoryResult<(Vec<Project>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM projects");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM projects", PROJECT_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY start_date DESC, id LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let projects = rows.iter().map(map_project).collect::<Result<Vec<_>, _>>()?;
        Ok((projects, total))
    }

    /// Replace every editable field
    pub async fn update(&self, id: Uuid, project: &NewProject) -> RepositoryResult<Project> {
        info!("Updating project: {}", id);

        if !self.organization_is_live(project.organization_id).await? {
            return Err(RepositoryError::Invalid(MISSING_ORG.to_string()));
        }

        let sql = format!(
            r#"
            UPDATE projects SET
                name = $2, description = $3, start_date = $4, end_date = $5,
                status = $6, organization_id = $7, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.start_date)
            .bind(project.end_date)
            .bind(&project.status)
            .bind(project.organization_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| write_error(e, "Project already exists"))?
            .ok_or_else(|| RepositoryError::NotFound("Project not found".to_string()))?;
        Ok(map_project(&row)?)
    }

    /// Soft-delete a project without live products
    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting project: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "projects", id, "Project not found").await?;
            ensure_none(&mut tx, LIVE_PRODUCTS, id, "Project still has products").await?;
            mark_deleted(&mut tx, "projects", id).await
        }
        .await;
        finish(tx, result).await
    }

    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging project: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "projects", id, "Project not found").await?;
            ensure_none(&mut tx, LIVE_PRODUCTS, id, "Project still has products").await?;
            remove(&mut tx, "projects", id).await
        }
        .await;
        finish(tx, result).await
    }
}
