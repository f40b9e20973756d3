//! Postgres-backed credential store.
//!
//! Every mutation runs in one transaction and is rolled back on any error.
//! Updates lock the target row (`SELECT ... FOR UPDATE`) before applying the
//! patch, so concurrent updates serialize instead of losing writes.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DomainError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use omms_auth::{
    NewPermission, NewRole, PasswordDigest, Permission, PermissionCode, PermissionPatch, Role,
    RoleName, RolePatch, User,
};
use omms_core::patch::apply as apply_nullable;
use omms_core::{DomainError, DomainResult, Page, PermissionId, RoleId, UserId};

use super::{
    CredentialStore, NewUserRecord, PermissionFilter, RoleFilter, UserChanges, UserFilter,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            BIGSERIAL PRIMARY KEY,
        username      VARCHAR(50)  NOT NULL UNIQUE,
        email         VARCHAR(255) NOT NULL UNIQUE,
        password_hash TEXT         NOT NULL,
        full_name     VARCHAR(100) NULL,
        phone         VARCHAR(20)  NULL,
        avatar        TEXT         NULL,
        is_active     BOOLEAN      NOT NULL DEFAULT TRUE,
        is_superuser  BOOLEAN      NOT NULL DEFAULT FALSE,
        created_at    TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        last_login    TIMESTAMPTZ  NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id          BIGSERIAL PRIMARY KEY,
        name        VARCHAR(50) NOT NULL UNIQUE,
        description TEXT        NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id          BIGSERIAL PRIMARY KEY,
        code        VARCHAR(100) NOT NULL UNIQUE,
        name        VARCHAR(100) NOT NULL,
        description TEXT         NULL,
        created_at  TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ  NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id       BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id BIGINT NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )
    "#,
];

const USER_COLUMNS: &str = "id, username, email, password_hash, full_name, phone, avatar, \
     is_active, is_superuser, created_at, updated_at, last_login";

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";

const PERMISSION_COLUMNS: &str = "id, code, name, description, created_at, updated_at";

/// Credential store persisted in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> DomainResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and join tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn begin(&self) -> DomainResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn acquire(&self) -> DomainResult<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row loading
// ─────────────────────────────────────────────────────────────────────────────

struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    full_name: Option<String>,
    phone: Option<String>,
    avatar: Option<String>,
    is_active: bool,
    is_superuser: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            full_name: row.try_get("full_name")?,
            phone: row.try_get("phone")?,
            avatar: row.try_get("avatar")?,
            is_active: row.try_get("is_active")?,
            is_superuser: row.try_get("is_superuser")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login: row.try_get("last_login")?,
        })
    }
}

impl UserRow {
    fn into_user(self, roles: Vec<Role>) -> User {
        User {
            id: UserId::new(self.id),
            username: self.username,
            email: self.email,
            password_hash: PasswordDigest::from_stored(self.password_hash),
            full_name: self.full_name,
            phone: self.phone,
            avatar: self.avatar,
            is_active: self.is_active,
            is_superuser: self.is_superuser,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_login: self.last_login,
            roles,
        }
    }
}

fn decode<T>(row: &PgRow, what: &str) -> DomainResult<T>
where
    T: for<'r> sqlx::FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| DomainError::storage(format!("failed to decode {what} row: {e}")))
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: PermissionId::new(row.try_get("id")?),
        code: PermissionCode::new(row.try_get::<String, _>("code")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow, permissions: Vec<Permission>) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::new(row.try_get("id")?),
        name: RoleName::new(row.try_get::<String, _>("name")?),
        description: row.try_get("description")?,
        permissions,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Permissions of each role in `role_ids`, keyed by role id, ordered by id.
async fn permissions_for_roles(
    conn: &mut PgConnection,
    role_ids: &[i64],
) -> DomainResult<HashMap<i64, Vec<Permission>>> {
    if role_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT rp.role_id, p.id, p.code, p.name, p.description, p.created_at, p.updated_at
        FROM role_permissions rp
        JOIN permissions p ON p.id = rp.permission_id
        WHERE rp.role_id = ANY($1)
        ORDER BY p.id ASC
        "#,
    )
    .bind(role_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_role_permissions", e))?;

    let mut by_role: HashMap<i64, Vec<Permission>> = HashMap::new();
    for row in rows {
        let role_id: i64 = row
            .try_get("role_id")
            .map_err(|e| DomainError::storage(format!("failed to read role_id: {e}")))?;
        let permission = permission_from_row(&row)
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))?;
        by_role.entry(role_id).or_default().push(permission);
    }
    Ok(by_role)
}

async fn assemble_roles(conn: &mut PgConnection, rows: Vec<PgRow>) -> DomainResult<Vec<Role>> {
    let ids = rows
        .iter()
        .map(|r| r.try_get::<i64, _>("id"))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DomainError::storage(format!("failed to read role id: {e}")))?;
    let mut perms = permissions_for_roles(conn, &ids).await?;

    rows.iter()
        .zip(ids)
        .map(|(row, id)| {
            role_from_row(row, perms.remove(&id).unwrap_or_default())
                .map_err(|e| DomainError::storage(format!("failed to decode role row: {e}")))
        })
        .collect()
}

/// Roles (with permissions) of each user in `user_ids`, keyed by user id.
async fn roles_for_users(
    conn: &mut PgConnection,
    user_ids: &[i64],
) -> DomainResult<HashMap<i64, Vec<Role>>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT ur.user_id, r.id, r.name, r.description, r.created_at, r.updated_at
        FROM user_roles ur
        JOIN roles r ON r.id = ur.role_id
        WHERE ur.user_id = ANY($1)
        ORDER BY r.id ASC
        "#,
    )
    .bind(user_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_user_roles", e))?;

    let owners = rows
        .iter()
        .map(|r| r.try_get::<i64, _>("user_id"))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DomainError::storage(format!("failed to read user_id: {e}")))?;
    let roles = assemble_roles(conn, rows).await?;

    let mut by_user: HashMap<i64, Vec<Role>> = HashMap::new();
    for (owner, role) in owners.into_iter().zip(roles) {
        by_user.entry(owner).or_default().push(role);
    }
    Ok(by_user)
}

async fn assemble_users(conn: &mut PgConnection, rows: Vec<PgRow>) -> DomainResult<Vec<User>> {
    let users = rows
        .iter()
        .map(|r| decode::<UserRow>(r, "user"))
        .collect::<DomainResult<Vec<_>>>()?;
    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    let mut roles = roles_for_users(conn, &ids).await?;
    Ok(users
        .into_iter()
        .map(|u| {
            let held = roles.remove(&u.id).unwrap_or_default();
            u.into_user(held)
        })
        .collect())
}

async fn load_user(conn: &mut PgConnection, id: i64) -> DomainResult<Option<User>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_user", e))?;
    match row {
        None => Ok(None),
        Some(row) => Ok(assemble_users(conn, vec![row]).await?.pop()),
    }
}

async fn load_role(conn: &mut PgConnection, id: i64) -> DomainResult<Option<Role>> {
    let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_role", e))?;
    match row {
        None => Ok(None),
        Some(row) => Ok(assemble_roles(conn, vec![row]).await?.pop()),
    }
}

async fn exists(conn: &mut PgConnection, table: &str, id: i64) -> DomainResult<bool> {
    let row = sqlx::query(&format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1) AS found"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("exists", e))?;
    row.try_get("found")
        .map_err(|e| DomainError::storage(format!("failed to read existence flag: {e}")))
}

async fn require(conn: &mut PgConnection, table: &str, what: &str, id: i64) -> DomainResult<()> {
    if exists(conn, table, id).await? {
        Ok(())
    } else {
        Err(DomainError::not_found(format!("{what} {id}")))
    }
}

/// True if `column = value` is held by a row other than `except`.
async fn taken(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    value: &str,
    except: Option<i64>,
) -> DomainResult<bool> {
    let row = sqlx::query(&format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE {column} = $1 AND ($2::bigint IS NULL OR id <> $2)) AS found"
    ))
    .bind(value)
    .bind(except)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("uniqueness_check", e))?;
    row.try_get("found")
        .map_err(|e| DomainError::storage(format!("failed to read existence flag: {e}")))
}

fn limit_offset(page: Page) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.skip))
}

// ─────────────────────────────────────────────────────────────────────────────
// CredentialStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>> {
        let mut conn = self.acquire().await?;
        load_user(&mut conn, id.get()).await
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_username", e))?;
        match row {
            None => Ok(None),
            Some(row) => Ok(assemble_users(&mut conn, vec![row]).await?.pop()),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = lower($1)"))
            .bind(email)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_email", e))?;
        match row {
            None => Ok(None),
            Some(row) => Ok(assemble_users(&mut conn, vec![row]).await?.pop()),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, filter: &UserFilter, page: Page) -> DomainResult<Vec<User>> {
        let mut conn = self.acquire().await?;
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NULL OR strpos(lower(username), lower($1)) > 0)
              AND ($2::text IS NULL OR strpos(lower(email), lower($2)) > 0)
              AND ($3::boolean IS NULL OR is_active = $3)
              AND ($4::boolean IS NULL OR is_superuser = $4)
            ORDER BY id ASC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(filter.username.as_deref())
        .bind(filter.email.as_deref())
        .bind(filter.is_active)
        .bind(filter.is_superuser)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        assemble_users(&mut conn, rows).await
    }

    #[instrument(skip(self, record), fields(username = %record.username), err)]
    async fn create_user(&self, record: NewUserRecord) -> DomainResult<User> {
        let mut tx = self.begin().await?;
        if taken(&mut tx, "users", "username", &record.username, None).await? {
            return Err(DomainError::conflict("username already exists"));
        }
        if taken(&mut tx, "users", "email", &record.email, None).await? {
            return Err(DomainError::conflict("email already exists"));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, phone, avatar, is_active, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&record.username)
        .bind(&record.email)
        .bind(record.password_hash.as_str())
        .bind(&record.full_name)
        .bind(&record.phone)
        .bind(&record.avatar)
        .bind(record.is_active)
        .bind(record.is_superuser)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| DomainError::storage(format!("failed to read user id: {e}")))?;

        let user = load_user(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::storage("inserted user vanished"))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(user)
    }

    #[instrument(skip(self, changes), fields(user_id = %id), err)]
    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"))
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user", e))?
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))?;
        let current: UserRow = decode(&row, "user")?;

        if let Some(username) = &changes.username {
            if *username != current.username
                && taken(&mut tx, "users", "username", username, Some(current.id)).await?
            {
                return Err(DomainError::conflict("username already exists"));
            }
        }
        if let Some(email) = &changes.email {
            if *email != current.email
                && taken(&mut tx, "users", "email", email, Some(current.id)).await?
            {
                return Err(DomainError::conflict("email already exists"));
            }
        }

        sqlx::query(
            r#"
            UPDATE users SET
                username = $2,
                email = $3,
                password_hash = $4,
                full_name = $5,
                phone = $6,
                avatar = $7,
                is_active = $8,
                is_superuser = $9,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(current.id)
        .bind(changes.username.unwrap_or(current.username))
        .bind(changes.email.unwrap_or(current.email))
        .bind(
            changes
                .password_hash
                .map(|d| d.as_str().to_string())
                .unwrap_or(current.password_hash),
        )
        .bind(apply_nullable(changes.full_name, current.full_name))
        .bind(apply_nullable(changes.phone, current.phone))
        .bind(apply_nullable(changes.avatar, current.avatar))
        .bind(changes.is_active.unwrap_or(current.is_active))
        .bind(changes.is_superuser.unwrap_or(current.is_superuser))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        let user = load_user(&mut tx, id.get())
            .await?
            .ok_or_else(|| DomainError::storage("updated user vanished"))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("user {id}")));
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn touch_last_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        let done = sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id.get())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("touch_last_login", e))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("user {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        let mut conn = self.acquire().await?;
        load_role(&mut conn, id.get()).await
    }

    #[instrument(skip(self), err)]
    async fn get_role_by_name(&self, name: &str) -> DomainResult<Option<Role>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"))
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("get_role_by_name", e))?;
        match row {
            None => Ok(None),
            Some(row) => Ok(assemble_roles(&mut conn, vec![row]).await?.pop()),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> DomainResult<Vec<Role>> {
        let mut conn = self.acquire().await?;
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ROLE_COLUMNS}
            FROM roles
            WHERE ($1::text IS NULL OR strpos(lower(name), lower($1)) > 0)
            ORDER BY id ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(filter.name.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        assemble_roles(&mut conn, rows).await
    }

    #[instrument(skip(self), err)]
    async fn create_role(&self, role: NewRole) -> DomainResult<Role> {
        let mut tx = self.begin().await?;
        if taken(&mut tx, "roles", "name", &role.name, None).await? {
            return Err(DomainError::conflict("role name already exists"));
        }
        let row = sqlx::query("INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING id")
            .bind(&role.name)
            .bind(&role.description)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| DomainError::storage(format!("failed to read role id: {e}")))?;
        let created = load_role(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::storage("inserted role vanished"))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(created)
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn update_role(&self, id: RoleId, patch: RolePatch) -> DomainResult<Role> {
        let mut tx = self.begin().await?;
        let row = sqlx::query("SELECT name, description FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_role", e))?
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))?;
        let current_name: String = row
            .try_get("name")
            .map_err(|e| DomainError::storage(format!("failed to read role name: {e}")))?;
        let current_description: Option<String> = row
            .try_get("description")
            .map_err(|e| DomainError::storage(format!("failed to read role description: {e}")))?;

        if let Some(name) = &patch.name {
            if *name != current_name && taken(&mut tx, "roles", "name", name, Some(id.get())).await? {
                return Err(DomainError::conflict("role name already exists"));
            }
        }

        sqlx::query("UPDATE roles SET name = $2, description = $3, updated_at = NOW() WHERE id = $1")
            .bind(id.get())
            .bind(patch.name.unwrap_or(current_name))
            .bind(apply_nullable(patch.description, current_description))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;

        let updated = load_role(&mut tx, id.get())
            .await?
            .ok_or_else(|| DomainError::storage("updated role vanished"))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        let done = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("role {id}")));
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn get_permission(&self, id: PermissionId) -> DomainResult<Option<Permission>> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission", e))?;
        row.map(|r| permission_from_row(&r))
            .transpose()
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))
    }

    #[instrument(skip(self), err)]
    async fn get_permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE code = $1"))
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission_by_code", e))?;
        row.map(|r| permission_from_row(&r))
            .transpose()
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        page: Page,
    ) -> DomainResult<Vec<Permission>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM permissions
            WHERE ($1::text IS NULL OR strpos(lower(code), lower($1)) > 0)
              AND ($2::text IS NULL OR strpos(lower(name), lower($2)) > 0)
            ORDER BY id ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.code.as_deref())
        .bind(filter.name.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))
    }

    #[instrument(skip(self), err)]
    async fn create_permission(&self, permission: NewPermission) -> DomainResult<Permission> {
        let mut tx = self.begin().await?;
        if taken(&mut tx, "permissions", "code", &permission.code, None).await? {
            return Err(DomainError::conflict("permission code already exists"));
        }
        let row = sqlx::query(&format!(
            "INSERT INTO permissions (code, name, description) VALUES ($1, $2, $3) RETURNING {PERMISSION_COLUMNS}"
        ))
        .bind(&permission.code)
        .bind(&permission.name)
        .bind(&permission.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_permission", e))?;
        let created = permission_from_row(&row)
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(created)
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn update_permission(
        &self,
        id: PermissionId,
        patch: PermissionPatch,
    ) -> DomainResult<Permission> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_permission", e))?
        .ok_or_else(|| DomainError::not_found(format!("permission {id}")))?;
        let current = permission_from_row(&row)
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))?;

        if let Some(code) = &patch.code {
            if code != current.code.as_str()
                && taken(&mut tx, "permissions", "code", code, Some(id.get())).await?
            {
                return Err(DomainError::conflict("permission code already exists"));
            }
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE permissions SET code = $2, name = $3, description = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(patch.code.unwrap_or_else(|| current.code.as_str().to_string()))
        .bind(patch.name.unwrap_or(current.name))
        .bind(apply_nullable(patch.description, current.description))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?;
        let updated = permission_from_row(&row)
            .map_err(|e| DomainError::storage(format!("failed to decode permission row: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn delete_permission(&self, id: PermissionId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        let done = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_permission", e))?;
        if done.rows_affected() == 0 {
            return Err(DomainError::not_found(format!("permission {id}")));
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn all_permission_codes(&self) -> DomainResult<Vec<PermissionCode>> {
        let rows = sqlx::query("SELECT code FROM permissions ORDER BY id ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_permission_codes", e))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("code").map(PermissionCode::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::storage(format!("failed to read permission code: {e}")))
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn assign_role_to_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        require(&mut tx, "users", "user", user_id.get()).await?;
        require(&mut tx, "roles", "role", role_id.get()).await?;
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("assign_role_to_user", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn remove_role_from_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        require(&mut tx, "users", "user", user_id.get()).await?;
        require(&mut tx, "roles", "role", role_id.get()).await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("remove_role_from_user", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(role_id = %role_id, permission_id = %permission_id), err)]
    async fn assign_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        require(&mut tx, "roles", "role", role_id.get()).await?;
        require(&mut tx, "permissions", "permission", permission_id.get()).await?;
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id.get())
        .bind(permission_id.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("assign_permission_to_role", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(role_id = %role_id, permission_id = %permission_id), err)]
    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        require(&mut tx, "roles", "role", role_id.get()).await?;
        require(&mut tx, "permissions", "permission", permission_id.get()).await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id.get())
            .bind(permission_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("remove_permission_from_role", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

/// Map SQLx errors to DomainError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    if is_unique_violation(&err) {
        return DomainError::conflict(format!("duplicate value in {operation}"));
    }
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Foreign key violation: a referenced row was deleted concurrently.
                Some("23503") => DomainError::not_found(format!("referenced row in {operation}")),
                _ => DomainError::storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DomainError::storage(format!("connection pool closed in {operation}"))
        }
        _ => DomainError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    static MIGRATION: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    /// Connects to `OMMS_TEST_DATABASE_URL`; tests are skipped when it is unset.
    async fn store() -> Option<PostgresCredentialStore> {
        let url = std::env::var("OMMS_TEST_DATABASE_URL").ok()?;
        let store = PostgresCredentialStore::connect(&url).await.unwrap();
        {
            let _serial = MIGRATION.lock().await;
            store.migrate().await.unwrap();
        }
        Some(store)
    }

    /// Natural keys unique per run so tests can share one database.
    fn unique(prefix: &str) -> String {
        format!("{prefix}{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    fn record(username: &str) -> NewUserRecord {
        NewUserRecord {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: PasswordDigest::from_stored("$argon2id$stub"),
            full_name: Some("Full Name".to_string()),
            phone: None,
            avatar: None,
            is_active: true,
            is_superuser: false,
        }
    }

    fn new_role(name: &str) -> NewRole {
        NewRole {
            name: name.to_string(),
            description: Some("temporary".to_string()),
        }
    }

    fn new_permission(code: &str) -> NewPermission {
        NewPermission {
            code: code.to_string(),
            name: code.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn unique_keys_conflict_and_leave_rows_untouched() {
        let Some(store) = store().await else { return };
        let name = unique("u");
        let user = store.create_user(record(&name)).await.unwrap();

        let mut dup = record(&name);
        dup.email = format!("other-{name}@example.com");
        assert!(matches!(store.create_user(dup).await, Err(DomainError::Conflict(_))));

        let role = store.create_role(new_role(&unique("r"))).await.unwrap();
        let err = store.create_role(new_role(role.name.as_str())).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let perm = store.create_permission(new_permission(&unique("p:"))).await.unwrap();
        let err = store
            .create_permission(new_permission(perm.code.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let filter = UserFilter {
            username: Some(name.clone()),
            ..Default::default()
        };
        assert_eq!(store.list_users(&filter, Page::default()).await.unwrap().len(), 1);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().email, user.email);
    }

    #[tokio::test]
    async fn associations_are_idempotent() {
        let Some(store) = store().await else { return };
        let user = store.create_user(record(&unique("u"))).await.unwrap();
        let role = store.create_role(new_role(&unique("r"))).await.unwrap();
        let perm = store.create_permission(new_permission(&unique("p:"))).await.unwrap();

        for _ in 0..2 {
            store.assign_role_to_user(user.id, role.id).await.unwrap();
            store.assign_permission_to_role(role.id, perm.id).await.unwrap();
        }
        let loaded = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.roles.len(), 1);
        assert_eq!(loaded.roles[0].permissions.len(), 1);

        for _ in 0..2 {
            store.remove_permission_from_role(role.id, perm.id).await.unwrap();
            store.remove_role_from_user(user.id, role.id).await.unwrap();
        }
        assert!(store.get_user(user.id).await.unwrap().unwrap().roles.is_empty());
        assert!(store.get_role(role.id).await.unwrap().unwrap().permissions.is_empty());
    }

    #[tokio::test]
    async fn deletes_cascade_through_join_tables() {
        let Some(store) = store().await else { return };
        let user = store.create_user(record(&unique("u"))).await.unwrap();
        let role = store.create_role(new_role(&unique("r"))).await.unwrap();
        let perm = store.create_permission(new_permission(&unique("p:"))).await.unwrap();
        store.assign_permission_to_role(role.id, perm.id).await.unwrap();
        store.assign_role_to_user(user.id, role.id).await.unwrap();

        store.delete_permission(perm.id).await.unwrap();
        assert!(store.get_role(role.id).await.unwrap().unwrap().permissions.is_empty());

        store.delete_role(role.id).await.unwrap();
        assert!(store.get_user(user.id).await.unwrap().unwrap().roles.is_empty());
        assert!(matches!(store.delete_role(role.id).await, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn explicit_null_clears_a_column() {
        let Some(store) = store().await else { return };
        let user = store.create_user(record(&unique("u"))).await.unwrap();
        let changes = UserChanges {
            full_name: Some(None),
            ..Default::default()
        };
        let updated = store.update_user(user.id, changes).await.unwrap();
        assert_eq!(updated.full_name, None);
        assert_eq!(updated.username, user.username);
    }
}
