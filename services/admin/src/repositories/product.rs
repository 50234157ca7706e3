//! Product repository

use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, finish, like_pattern, lock_any, lock_live, mark_deleted,
    remove, write_error,
};
use crate::models::{NewProduct, PageWindow, Product, ProductQuery};

const PRODUCT_COLUMNS: &str =
    "id, name, code, description, category, unit, project_id, created_at, updated_at";
const CODE_TAKEN: &str = "Product code already exists";
const MISSING_PROJECT: &str = "Project does not exist";

fn map_product(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        unit: row.try_get("unit")?,
        project_id: row.try_get("project_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &ProductQuery) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(project_id) = query.project_id {
        builder.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder.push(" AND category = ").push_bind(category.to_string());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[derive(Clone)]
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn project_is_live(&self, project_id: Uuid) -> RepositoryResult<bool> {
        let live = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(live)
    }

    pub async fn code_taken(&self, code: &str, except: Option<Uuid>) -> RepositoryResult<bool> {
        let taken = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM products
                WHERE code = $1 AND deleted_at IS NULL
                  AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(code)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    pub async fn create(&self, product: &NewProduct) -> RepositoryResult<Product> {
        info!("Creating product: {}", product.code);

        if !self.project_is_live(product.project_id).await? {
            return Err(RepositoryError::Invalid(MISSING_PROJECT.to_string()));
        }

        let sql = format!(
            r#"
            INSERT INTO products (id, name, code, description, category, unit, project_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&product.name)
            .bind(&product.code)
            .bind(&product.description)
            .bind(&product.category)
            .bind(&product.unit)
            .bind(product.project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, CODE_TAKEN))?;
        Ok(map_product(&row)?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Product>> {
        let sql = format!(
            "SELECT {} FROM products WHERE id = $1 AND deleted_at IS NULL",
            PRODUCT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_product).transpose()?)
    }

    pub async fn list(
        &self,
        query: &ProductQuery,
        window: PageWindow,
    ) -> RepositoryResult<(Vec<Product>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM products");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM products", PRODUCT_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY code LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let products = rows.iter().map(map_product).collect::<Result<Vec<_>, _>>()?;
        Ok((products, total))
    }

    /// Replace every editable field
    pub async fn update(&self, id: Uuid, product: &NewProduct) -> RepositoryResult<Product> {
        info!("Updating product: {}", id);

        if !self.project_is_live(product.project_id).await? {
            return Err(RepositoryError::Invalid(MISSING_PROJECT.to_string()));
        }

        let sql = format!(
            r#"
            UPDATE products SET
                name = $2, code = $3, description = $4, category = $5, unit = $6,
                project_id = $7, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&product.name)
            .bind(&product.code)
            .bind(&product.description)
            .bind(&product.category)
            .bind(&product.unit)
            .bind(product.project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| write_error(e, CODE_TAKEN))?
            .ok_or_else(|| RepositoryError::NotFound("Product not found".to_string()))?;
        Ok(map_product(&row)?)
    }

    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting product: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "products", id, "Product not found").await?;
            mark_deleted(&mut tx, "products", id).await
        }
        .await;
        finish(tx, result).await
    }

    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging product: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "products", id, "Product not found").await?;
            remove(&mut tx, "products", id).await
        }
        .await;
        finish(tx, result).await
    }
}
