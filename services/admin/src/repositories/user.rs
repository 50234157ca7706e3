//! User repository for database operations

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, ensure_none, finish, like_pattern, lock_any, lock_live,
    mark_deleted, remove,
};
use crate::models::{NewUser, PageWindow, User, UserChanges, UserQuery};

const USER_COLUMNS: &str = "id, username, password_hash, email, full_name, phone, is_active, \
     role, org_id, last_login_at, created_by, created_at, updated_at";

fn map_user(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        is_active: row.try_get("is_active")?,
        role: role.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        org_id: row.try_get("org_id")?,
        last_login_at: row.try_get("last_login_at")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Duplicate username or email, told apart by the index that fired
fn user_write_error(err: sqlx::Error) -> RepositoryError {
    let email_index = match &err {
        sqlx::Error::Database(db_err) => db_err
            .constraint()
            .is_some_and(|name| name.contains("email")),
        _ => false,
    };
    let conflict = if email_index {
        "Email already exists"
    } else {
        "Username already exists"
    };
    super::write_error(err, conflict)
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, query: &UserQuery) {
    builder.push(" WHERE deleted_at IS NULL");

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR full_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(org_id) = query.org_id {
        builder.push(" AND org_id = ").push_bind(org_id);
    }
    if let Some(role) = query.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(is_active) = query.is_active {
        builder.push(" AND is_active = ").push_bind(is_active);
    }
}

/// Insert one user on an open connection
pub(crate) async fn insert_user(conn: &mut PgConnection, new_user: &NewUser) -> RepositoryResult<User> {
    let sql = format!(
        r#"
        INSERT INTO users (id, username, password_hash, email, full_name, phone,
                           is_active, role, org_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        USER_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(&new_user.email)
        .bind(&new_user.full_name)
        .bind(&new_user.phone)
        .bind(new_user.is_active)
        .bind(new_user.role.as_str())
        .bind(new_user.org_id)
        .bind(new_user.created_by)
        .fetch_one(&mut *conn)
        .await
        .map_err(user_write_error)?;

    Ok(map_user(&row)?)
}

/// Replace the role links of a user, checking every role is live
async fn link_roles(conn: &mut PgConnection, user_id: Uuid, role_ids: &[Uuid]) -> RepositoryResult<()> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    for role_id in role_ids {
        let live: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 AND deleted_at IS NULL")
                .bind(role_id)
                .fetch_optional(&mut *conn)
                .await?;
        if live.is_none() {
            return Err(RepositoryError::Invalid(format!(
                "Role {} does not exist",
                role_id
            )));
        }

        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn apply_changes(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &UserChanges,
    role_ids: Option<&[Uuid]>,
) -> RepositoryResult<User> {
    let sql = format!(
        r#"
        UPDATE users SET
            username = COALESCE($2, username),
            password_hash = COALESCE($3, password_hash),
            email = COALESCE($4, email),
            full_name = COALESCE($5, full_name),
            phone = COALESCE($6, phone),
            is_active = COALESCE($7, is_active),
            role = COALESCE($8, role),
            org_id = CASE WHEN $10 THEN $9 ELSE org_id END,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING {}
        "#,
        USER_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(id)
        .bind(changes.username.as_deref())
        .bind(changes.password_hash.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.full_name.as_deref())
        .bind(changes.phone.as_deref())
        .bind(changes.is_active)
        .bind(changes.role.map(|role| role.as_str()))
        .bind(changes.org_id.flatten())
        .bind(changes.org_id.is_some())
        .fetch_optional(&mut *conn)
        .await
        .map_err(user_write_error)?
        .ok_or_else(|| RepositoryError::NotFound("User not found".to_string()))?;
    let user = map_user(&row)?;

    if let Some(role_ids) = role_ids {
        link_roles(conn, id, role_ids).await?;
    }

    Ok(user)
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a user without role links
    pub async fn create(&self, new_user: &NewUser) -> RepositoryResult<User> {
        info!("Creating new user: {}", new_user.username);
        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, new_user).await
    }

    /// Create a user and link it to `role_ids` in one transaction
    pub async fn create_with_roles(
        &self,
        new_user: &NewUser,
        role_ids: &[Uuid],
    ) -> RepositoryResult<User> {
        info!(
            "Creating user {} with {} role(s)",
            new_user.username,
            role_ids.len()
        );

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<User> = async {
            let user = insert_user(&mut tx, new_user).await?;
            link_roles(&mut tx, user.id, role_ids).await?;
            Ok(user)
        }
        .await;
        finish(tx, result).await
    }

    /// Find a live user by ID
    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_user).transpose()?)
    }

    /// Find a live user by username
    pub async fn find_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE username = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_user).transpose()?)
    }

    /// Whether a live user other than `except` holds `username`
    pub async fn username_taken(&self, username: &str, except: Option<Uuid>) -> RepositoryResult<bool> {
        let taken = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users
                WHERE username = $1 AND deleted_at IS NULL
                  AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(username)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    /// Whether a live user other than `except` uses `email`
    pub async fn email_taken(&self, email: &str, except: Option<Uuid>) -> RepositoryResult<bool> {
        if email.is_empty() {
            return Ok(false);
        }
        let taken = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users
                WHERE email = $1 AND deleted_at IS NULL
                  AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(email)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    /// One page of live users plus the total matching count
    pub async fn list(&self, query: &UserQuery, window: PageWindow) -> RepositoryResult<(Vec<User>, i64)> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(window.limit())
            .push(" OFFSET ")
            .push_bind(window.offset());
        let rows = select.build().fetch_all(&self.pool).await?;

        let users = rows.iter().map(map_user).collect::<Result<Vec<_>, _>>()?;
        Ok((users, total))
    }

    /// Live members of an organization
    pub async fn list_by_org(&self, org_id: Uuid) -> RepositoryResult<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE org_id = $1 AND deleted_at IS NULL ORDER BY username",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(org_id).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(map_user).collect::<Result<Vec<_>, _>>()?)
    }

    /// Apply `changes`, and replace role links when `role_ids` is given
    pub async fn update(
        &self,
        id: Uuid,
        changes: &UserChanges,
        role_ids: Option<&[Uuid]>,
    ) -> RepositoryResult<User> {
        info!("Updating user: {}", id);

        let mut tx = self.pool.begin().await?;
        let result = apply_changes(&mut tx, id, changes, role_ids).await;
        finish(tx, result).await
    }

    /// Record a successful login; concurrent logins are last-write-wins
    pub async fn touch_last_login(&self, id: Uuid) -> RepositoryResult<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite the stored credential with a new digest
    pub async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    /// Every stored credential, live or deleted, for bulk re-hashing
    pub async fn credentials(&self) -> RepositoryResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query("SELECT id, password_hash FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        let credentials = rows
            .iter()
            .map(|row| -> Result<(Uuid, String), sqlx::Error> {
                Ok((row.try_get("id")?, row.try_get("password_hash")?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(credentials)
    }

    pub async fn soft_delete(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Soft-deleting user: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_live(&mut tx, "users", id, "User not found").await?;
            mark_deleted(&mut tx, "users", id).await
        }
        .await;
        finish(tx, result).await
    }

    /// Remove a user row for good
    pub async fn purge(&self, id: Uuid) -> RepositoryResult<()> {
        info!("Purging user: {}", id);

        let mut tx = self.pool.begin().await?;
        let result: RepositoryResult<()> = async {
            lock_any(&mut tx, "users", id, "User not found").await?;
            ensure_none(
                &mut tx,
                "SELECT COUNT(*) FROM object_classes WHERE created_by = $1",
                id,
                "User still owns object classes",
            )
            .await?;
            remove(&mut tx, "users", id).await
        }
        .await;
        finish(tx, result).await
    }
}
