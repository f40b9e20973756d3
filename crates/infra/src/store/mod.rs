//! Credential store boundary.
//!
//! Durable home of users, roles, permissions and their associations. Every
//! mutation is all-or-nothing; failures leave the store unchanged.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use omms_auth::{
    NewPermission, NewRole, PasswordDigest, Permission, PermissionCode, PermissionPatch, Role,
    RolePatch, User,
};
use omms_core::{DomainResult, Page, PermissionId, RoleId, UserId};

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;

/// A validated user ready for insertion; the password is already hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: PasswordDigest,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
}

/// Validated partial update for a user row. `None` leaves a field untouched;
/// `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<PasswordDigest>,
    pub full_name: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub avatar: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

/// User listing filters. Text filters are case-insensitive substring matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserFilter {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: Option<bool>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        contains_ci(&user.username, self.username.as_deref())
            && contains_ci(&user.email, self.email.as_deref())
            && self.is_active.is_none_or(|v| v == user.is_active)
            && self.is_superuser.is_none_or(|v| v == user.is_superuser)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleFilter {
    #[serde(default)]
    pub name: Option<String>,
}

impl RoleFilter {
    pub fn matches(&self, role: &Role) -> bool {
        contains_ci(role.name.as_str(), self.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionFilter {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl PermissionFilter {
    pub fn matches(&self, permission: &Permission) -> bool {
        contains_ci(permission.code.as_str(), self.code.as_deref())
            && contains_ci(&permission.name, self.name.as_deref())
    }
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

/// Async persistence contract for the identity model.
///
/// Implementations must:
/// - enforce uniqueness of username, email, role name and permission code
///   (`Conflict`), leaving the store unchanged on violation
/// - treat associations as sets (assigning twice or removing an absent link
///   is a successful no-op)
/// - return `NotFound` when a referenced id does not exist
/// - list rows in insertion order (ascending id)
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    // Users

    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> DomainResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> DomainResult<Option<User>>;

    async fn list_users(&self, filter: &UserFilter, page: Page) -> DomainResult<Vec<User>>;

    async fn create_user(&self, record: NewUserRecord) -> DomainResult<User>;

    /// Apply only the supplied fields. Uniqueness is re-checked only for a
    /// username or email that actually changes.
    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User>;

    async fn delete_user(&self, id: UserId) -> DomainResult<()>;

    async fn touch_last_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<()>;

    // Roles

    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>>;

    async fn get_role_by_name(&self, name: &str) -> DomainResult<Option<Role>>;

    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> DomainResult<Vec<Role>>;

    async fn create_role(&self, role: NewRole) -> DomainResult<Role>;

    async fn update_role(&self, id: RoleId, patch: RolePatch) -> DomainResult<Role>;

    /// Deletes the role and detaches it from every user and permission.
    async fn delete_role(&self, id: RoleId) -> DomainResult<()>;

    // Permissions

    async fn get_permission(&self, id: PermissionId) -> DomainResult<Option<Permission>>;

    async fn get_permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>>;

    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        page: Page,
    ) -> DomainResult<Vec<Permission>>;

    async fn create_permission(&self, permission: NewPermission) -> DomainResult<Permission>;

    async fn update_permission(
        &self,
        id: PermissionId,
        patch: PermissionPatch,
    ) -> DomainResult<Permission>;

    /// Deletes the permission and detaches it from every role.
    async fn delete_permission(&self, id: PermissionId) -> DomainResult<()>;

    /// Every permission code currently in the catalog, freshly read.
    async fn all_permission_codes(&self) -> DomainResult<Vec<PermissionCode>>;

    // Associations

    async fn assign_role_to_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()>;

    async fn remove_role_from_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()>;

    async fn assign_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()>;

    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()>;
}

/// Shared store handle used by services and the HTTP layer.
pub type SharedCredentialStore = Arc<dyn CredentialStore>;
