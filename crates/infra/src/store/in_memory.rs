use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use omms_auth::{
    NewPermission, NewRole, PasswordDigest, Permission, PermissionCode, PermissionPatch, Role,
    RoleName, RolePatch, User,
};
use omms_core::patch::apply as apply_nullable;
use omms_core::{DomainError, DomainResult, Entity, Page, PermissionId, RoleId, UserId};

use super::{
    CredentialStore, NewUserRecord, PermissionFilter, RoleFilter, UserChanges, UserFilter,
};

#[derive(Debug, Clone)]
struct UserRow {
    username: String,
    email: String,
    password_hash: PasswordDigest,
    full_name: Option<String>,
    phone: Option<String>,
    avatar: Option<String>,
    is_active: bool,
    is_superuser: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct RoleRow {
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PermissionRow {
    code: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Tables plus join sets. Ids are never reused.
#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, UserRow>,
    roles: BTreeMap<i64, RoleRow>,
    permissions: BTreeMap<i64, PermissionRow>,
    user_roles: BTreeSet<(i64, i64)>,
    role_permissions: BTreeSet<(i64, i64)>,
    last_user_id: i64,
    last_role_id: i64,
    last_permission_id: i64,
}

impl Tables {
    fn permission(&self, id: i64) -> Option<Permission> {
        self.permissions.get(&id).map(|row| Permission {
            id: PermissionId::new(id),
            code: PermissionCode::new(row.code.clone()),
            name: row.name.clone(),
            description: row.description.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn role(&self, id: i64) -> Option<Role> {
        let row = self.roles.get(&id)?;
        let permissions = self
            .role_permissions
            .range((id, i64::MIN)..=(id, i64::MAX))
            .filter_map(|&(_, pid)| self.permission(pid))
            .collect();
        Some(Role {
            id: RoleId::new(id),
            name: RoleName::new(row.name.clone()),
            description: row.description.clone(),
            permissions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn user(&self, id: i64) -> Option<User> {
        let row = self.users.get(&id)?;
        let roles = self
            .user_roles
            .range((id, i64::MIN)..=(id, i64::MAX))
            .filter_map(|&(_, rid)| self.role(rid))
            .collect();
        Some(User {
            id: UserId::new(id),
            username: row.username.clone(),
            email: row.email.clone(),
            password_hash: row.password_hash.clone(),
            full_name: row.full_name.clone(),
            phone: row.phone.clone(),
            avatar: row.avatar.clone(),
            is_active: row.is_active,
            is_superuser: row.is_superuser,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
            roles,
        })
    }

    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users
            .iter()
            .any(|(id, u)| Some(*id) != except && u.username == username)
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .iter()
            .any(|(id, u)| Some(*id) != except && u.email == email)
    }

    fn role_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.roles
            .iter()
            .any(|(id, r)| Some(*id) != except && r.name == name)
    }

    fn permission_code_taken(&self, code: &str, except: Option<i64>) -> bool {
        self.permissions
            .iter()
            .any(|(id, p)| Some(*id) != except && p.code == code)
    }

    fn require_user(&self, id: UserId) -> DomainResult<()> {
        if self.users.contains_key(&id.get()) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("user {id}")))
        }
    }

    fn require_role(&self, id: RoleId) -> DomainResult<()> {
        if self.roles.contains_key(&id.get()) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("role {id}")))
        }
    }

    fn require_permission(&self, id: PermissionId) -> DomainResult<()> {
        if self.permissions.contains_key(&id.get()) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("permission {id}")))
        }
    }
}

/// Listings are ordered by id, matching the Postgres store.
fn paginate<T: Entity>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.sort_by_key(|row| row.id());
    rows.into_iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .collect()
}

/// In-memory credential store.
///
/// Intended for tests/dev. Each mutation runs entirely under one write lock,
/// validating before it changes anything, so a failed call leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::storage("lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::storage("lock poisoned"))
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>> {
        Ok(self.read()?.user(id.get()))
    }

    async fn get_user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        let t = self.read()?;
        let id = t
            .users
            .iter()
            .find(|(_, u)| u.username == username)
            .map(|(id, _)| *id);
        Ok(id.and_then(|id| t.user(id)))
    }

    async fn get_user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        let t = self.read()?;
        let email = email.to_lowercase();
        let id = t
            .users
            .iter()
            .find(|(_, u)| u.email == email)
            .map(|(id, _)| *id);
        Ok(id.and_then(|id| t.user(id)))
    }

    async fn list_users(&self, filter: &UserFilter, page: Page) -> DomainResult<Vec<User>> {
        let t = self.read()?;
        let rows = t
            .users
            .keys()
            .filter_map(|id| t.user(*id))
            .filter(|u| filter.matches(u));
        Ok(paginate(rows, page))
    }

    async fn create_user(&self, record: NewUserRecord) -> DomainResult<User> {
        let mut t = self.write()?;
        if t.username_taken(&record.username, None) {
            return Err(DomainError::conflict("username already exists"));
        }
        if t.email_taken(&record.email, None) {
            return Err(DomainError::conflict("email already exists"));
        }

        let now = Utc::now();
        t.last_user_id += 1;
        let id = t.last_user_id;
        t.users.insert(
            id,
            UserRow {
                username: record.username,
                email: record.email,
                password_hash: record.password_hash,
                full_name: record.full_name,
                phone: record.phone,
                avatar: record.avatar,
                is_active: record.is_active,
                is_superuser: record.is_superuser,
                created_at: now,
                updated_at: now,
                last_login: None,
            },
        );
        t.user(id)
            .ok_or_else(|| DomainError::storage("inserted user vanished"))
    }

    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User> {
        let mut t = self.write()?;
        let raw = id.get();
        let current = t
            .users
            .get(&raw)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))?;

        if let Some(username) = &changes.username {
            if *username != current.username && t.username_taken(username, Some(raw)) {
                return Err(DomainError::conflict("username already exists"));
            }
        }
        if let Some(email) = &changes.email {
            if *email != current.email && t.email_taken(email, Some(raw)) {
                return Err(DomainError::conflict("email already exists"));
            }
        }

        let updated = UserRow {
            username: changes.username.unwrap_or(current.username),
            email: changes.email.unwrap_or(current.email),
            password_hash: changes.password_hash.unwrap_or(current.password_hash),
            full_name: apply_nullable(changes.full_name, current.full_name),
            phone: apply_nullable(changes.phone, current.phone),
            avatar: apply_nullable(changes.avatar, current.avatar),
            is_active: changes.is_active.unwrap_or(current.is_active),
            is_superuser: changes.is_superuser.unwrap_or(current.is_superuser),
            created_at: current.created_at,
            updated_at: Utc::now(),
            last_login: current.last_login,
        };
        t.users.insert(raw, updated);
        t.user(raw)
            .ok_or_else(|| DomainError::storage("updated user vanished"))
    }

    async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        let mut t = self.write()?;
        let raw = id.get();
        if t.users.remove(&raw).is_none() {
            return Err(DomainError::not_found(format!("user {id}")));
        }
        t.user_roles.retain(|(uid, _)| *uid != raw);
        Ok(())
    }

    async fn touch_last_login(&self, id: UserId, at: DateTime<Utc>) -> DomainResult<()> {
        let mut t = self.write()?;
        let row = t
            .users
            .get_mut(&id.get())
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))?;
        row.last_login = Some(at);
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        Ok(self.read()?.role(id.get()))
    }

    async fn get_role_by_name(&self, name: &str) -> DomainResult<Option<Role>> {
        let t = self.read()?;
        let id = t.roles.iter().find(|(_, r)| r.name == name).map(|(id, _)| *id);
        Ok(id.and_then(|id| t.role(id)))
    }

    async fn list_roles(&self, filter: &RoleFilter, page: Page) -> DomainResult<Vec<Role>> {
        let t = self.read()?;
        let rows = t
            .roles
            .keys()
            .filter_map(|id| t.role(*id))
            .filter(|r| filter.matches(r));
        Ok(paginate(rows, page))
    }

    async fn create_role(&self, role: NewRole) -> DomainResult<Role> {
        let mut t = self.write()?;
        if t.role_name_taken(&role.name, None) {
            return Err(DomainError::conflict("role name already exists"));
        }
        let now = Utc::now();
        t.last_role_id += 1;
        let id = t.last_role_id;
        t.roles.insert(
            id,
            RoleRow {
                name: role.name,
                description: role.description,
                created_at: now,
                updated_at: now,
            },
        );
        t.role(id)
            .ok_or_else(|| DomainError::storage("inserted role vanished"))
    }

    async fn update_role(&self, id: RoleId, patch: RolePatch) -> DomainResult<Role> {
        let mut t = self.write()?;
        let raw = id.get();
        let current = t
            .roles
            .get(&raw)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))?;
        if let Some(name) = &patch.name {
            if *name != current.name && t.role_name_taken(name, Some(raw)) {
                return Err(DomainError::conflict("role name already exists"));
            }
        }
        t.roles.insert(
            raw,
            RoleRow {
                name: patch.name.unwrap_or(current.name),
                description: apply_nullable(patch.description, current.description),
                created_at: current.created_at,
                updated_at: Utc::now(),
            },
        );
        t.role(raw)
            .ok_or_else(|| DomainError::storage("updated role vanished"))
    }

    async fn delete_role(&self, id: RoleId) -> DomainResult<()> {
        let mut t = self.write()?;
        let raw = id.get();
        if t.roles.remove(&raw).is_none() {
            return Err(DomainError::not_found(format!("role {id}")));
        }
        t.user_roles.retain(|(_, rid)| *rid != raw);
        t.role_permissions.retain(|(rid, _)| *rid != raw);
        Ok(())
    }

    async fn get_permission(&self, id: PermissionId) -> DomainResult<Option<Permission>> {
        Ok(self.read()?.permission(id.get()))
    }

    async fn get_permission_by_code(&self, code: &str) -> DomainResult<Option<Permission>> {
        let t = self.read()?;
        let id = t
            .permissions
            .iter()
            .find(|(_, p)| p.code == code)
            .map(|(id, _)| *id);
        Ok(id.and_then(|id| t.permission(id)))
    }

    async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        page: Page,
    ) -> DomainResult<Vec<Permission>> {
        let t = self.read()?;
        let rows = t
            .permissions
            .keys()
            .filter_map(|id| t.permission(*id))
            .filter(|p| filter.matches(p));
        Ok(paginate(rows, page))
    }

    async fn create_permission(&self, permission: NewPermission) -> DomainResult<Permission> {
        let mut t = self.write()?;
        if t.permission_code_taken(&permission.code, None) {
            return Err(DomainError::conflict("permission code already exists"));
        }
        let now = Utc::now();
        t.last_permission_id += 1;
        let id = t.last_permission_id;
        t.permissions.insert(
            id,
            PermissionRow {
                code: permission.code,
                name: permission.name,
                description: permission.description,
                created_at: now,
                updated_at: now,
            },
        );
        t.permission(id)
            .ok_or_else(|| DomainError::storage("inserted permission vanished"))
    }

    async fn update_permission(
        &self,
        id: PermissionId,
        patch: PermissionPatch,
    ) -> DomainResult<Permission> {
        let mut t = self.write()?;
        let raw = id.get();
        let current = t
            .permissions
            .get(&raw)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("permission {id}")))?;
        if let Some(code) = &patch.code {
            if *code != current.code && t.permission_code_taken(code, Some(raw)) {
                return Err(DomainError::conflict("permission code already exists"));
            }
        }
        t.permissions.insert(
            raw,
            PermissionRow {
                code: patch.code.unwrap_or(current.code),
                name: patch.name.unwrap_or(current.name),
                description: apply_nullable(patch.description, current.description),
                created_at: current.created_at,
                updated_at: Utc::now(),
            },
        );
        t.permission(raw)
            .ok_or_else(|| DomainError::storage("updated permission vanished"))
    }

    async fn delete_permission(&self, id: PermissionId) -> DomainResult<()> {
        let mut t = self.write()?;
        let raw = id.get();
        if t.permissions.remove(&raw).is_none() {
            return Err(DomainError::not_found(format!("permission {id}")));
        }
        t.role_permissions.retain(|(_, pid)| *pid != raw);
        Ok(())
    }

    async fn all_permission_codes(&self) -> DomainResult<Vec<PermissionCode>> {
        let t = self.read()?;
        Ok(t
            .permissions
            .values()
            .map(|p| PermissionCode::new(p.code.clone()))
            .collect())
    }

    async fn assign_role_to_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()> {
        let mut t = self.write()?;
        t.require_user(user_id)?;
        t.require_role(role_id)?;
        t.user_roles.insert((user_id.get(), role_id.get()));
        Ok(())
    }

    async fn remove_role_from_user(&self, user_id: UserId, role_id: RoleId) -> DomainResult<()> {
        let mut t = self.write()?;
        t.require_user(user_id)?;
        t.require_role(role_id)?;
        t.user_roles.remove(&(user_id.get(), role_id.get()));
        Ok(())
    }

    async fn assign_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        let mut t = self.write()?;
        t.require_role(role_id)?;
        t.require_permission(permission_id)?;
        t.role_permissions.insert((role_id.get(), permission_id.get()));
        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        let mut t = self.write()?;
        t.require_role(role_id)?;
        t.require_permission(permission_id)?;
        t.role_permissions.remove(&(role_id.get(), permission_id.get()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, email: &str) -> NewUserRecord {
        NewUserRecord {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: PasswordDigest::from_stored("$argon2id$stub"),
            full_name: None,
            phone: None,
            avatar: None,
            is_active: true,
            is_superuser: false,
        }
    }

    fn new_role(name: &str) -> NewRole {
        NewRole {
            name: name.to_string(),
            description: None,
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
    async fn duplicate_username_or_email_conflicts_and_changes_nothing() {
        let store = InMemoryCredentialStore::new();
        store.create_user(record("alice", "alice@example.com")).await.unwrap();

        let err = store
            .create_user(record("alice", "other@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let err = store
            .create_user(record("alice2", "alice@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let all = store.list_users(&UserFilter::default(), Page::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn update_rechecks_uniqueness_only_for_changed_fields() {
        let store = InMemoryCredentialStore::new();
        let alice = store.create_user(record("alice", "alice@example.com")).await.unwrap();
        store.create_user(record("bob", "bob@example.com")).await.unwrap();

        // Re-submitting the current username is not a conflict.
        let same = UserChanges {
            username: Some("alice".to_string()),
            full_name: Some(Some("Alice A.".to_string())),
            ..Default::default()
        };
        let updated = store.update_user(alice.id, same).await.unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Alice A."));
        assert_eq!(updated.email, "alice@example.com");

        let taken = UserChanges {
            email: Some("bob@example.com".to_string()),
            ..Default::default()
        };
        let err = store.update_user(alice.id, taken).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        let reloaded = store.get_user(alice.id).await.unwrap().unwrap();
        assert_eq!(reloaded.email, "alice@example.com");
    }

    #[tokio::test]
    async fn explicit_null_clears_nullable_fields() {
        let store = InMemoryCredentialStore::new();
        let mut rec = record("alice", "alice@example.com");
        rec.full_name = Some("Alice".to_string());
        rec.phone = Some("13800000000".to_string());
        let alice = store.create_user(rec).await.unwrap();

        let changes = UserChanges {
            full_name: Some(None),
            ..Default::default()
        };
        let updated = store.update_user(alice.id, changes).await.unwrap();
        assert_eq!(updated.full_name, None);
        assert_eq!(updated.phone.as_deref(), Some("13800000000"));

        let role = store
            .create_role(NewRole {
                name: "auditor".to_string(),
                description: Some("reads logs".to_string()),
            })
            .await
            .unwrap();
        let patch: RolePatch = serde_json::from_str(r#"{"description": null}"#).unwrap();
        let role = store.update_role(role.id, patch).await.unwrap();
        assert_eq!(role.description, None);
        assert_eq!(role.name.as_str(), "auditor");
    }

    #[tokio::test]
    async fn duplicate_role_name_conflicts_and_changes_nothing() {
        let store = InMemoryCredentialStore::new();
        let admin = store.create_role(new_role("admin")).await.unwrap();
        let editor = store.create_role(new_role("editor")).await.unwrap();

        let err = store.create_role(new_role("admin")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let rename = RolePatch {
            name: Some("admin".to_string()),
            ..Default::default()
        };
        let err = store.update_role(editor.id, rename).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let roles = store.list_roles(&RoleFilter::default(), Page::default()).await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "editor"]);
        assert_eq!(store.get_role(admin.id).await.unwrap().unwrap(), admin);
    }

    #[tokio::test]
    async fn duplicate_permission_code_conflicts_and_changes_nothing() {
        let store = InMemoryCredentialStore::new();
        store.create_permission(new_permission("user:list")).await.unwrap();
        let read = store.create_permission(new_permission("user:read")).await.unwrap();

        let err = store
            .create_permission(new_permission("user:list"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let recode = PermissionPatch {
            code: Some("user:list".to_string()),
            ..Default::default()
        };
        let err = store.update_permission(read.id, recode).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let codes = store.all_permission_codes().await.unwrap();
        let codes: Vec<&str> = codes.iter().map(|c| c.as_str()).collect();
        assert_eq!(codes.len(), 2);
        assert!(codes.contains(&"user:list") && codes.contains(&"user:read"));
        assert_eq!(store.get_permission(read.id).await.unwrap().unwrap(), read);
    }

    #[tokio::test]
    async fn role_permission_grants_are_idempotent_sets() {
        let store = InMemoryCredentialStore::new();
        let role = store.create_role(new_role("viewer")).await.unwrap();
        let list = store.create_permission(new_permission("user:list")).await.unwrap();
        let read = store.create_permission(new_permission("user:read")).await.unwrap();

        store.assign_permission_to_role(role.id, list.id).await.unwrap();
        store.assign_permission_to_role(role.id, list.id).await.unwrap();
        let loaded = store.get_role(role.id).await.unwrap().unwrap();
        assert_eq!(loaded.permissions.len(), 1);

        // Removing a permission the role never held is a no-op.
        store.remove_permission_from_role(role.id, read.id).await.unwrap();
        assert_eq!(store.get_role(role.id).await.unwrap().unwrap(), loaded);

        store.remove_permission_from_role(role.id, list.id).await.unwrap();
        store.remove_permission_from_role(role.id, list.id).await.unwrap();
        assert!(store.get_role(role.id).await.unwrap().unwrap().permissions.is_empty());
    }

    #[tokio::test]
    async fn associations_are_idempotent_sets() {
        let store = InMemoryCredentialStore::new();
        let user = store.create_user(record("carol", "carol@example.com")).await.unwrap();
        let role = store.create_role(new_role("auditor")).await.unwrap();

        store.assign_role_to_user(user.id, role.id).await.unwrap();
        store.assign_role_to_user(user.id, role.id).await.unwrap();
        let loaded = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.roles.len(), 1);

        store.remove_role_from_user(user.id, role.id).await.unwrap();
        store.remove_role_from_user(user.id, role.id).await.unwrap();
        let loaded = store.get_user(user.id).await.unwrap().unwrap();
        assert!(loaded.roles.is_empty());
    }

    #[tokio::test]
    async fn association_with_unknown_id_is_not_found() {
        let store = InMemoryCredentialStore::new();
        let role = store.create_role(new_role("auditor")).await.unwrap();
        let err = store
            .assign_role_to_user(UserId::new(99), role.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let err = store
            .assign_permission_to_role(role.id, PermissionId::new(42))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_role_detaches_it_everywhere() {
        let store = InMemoryCredentialStore::new();
        let user = store.create_user(record("dave", "dave@example.com")).await.unwrap();
        let role = store.create_role(new_role("editor")).await.unwrap();
        let perm = store.create_permission(new_permission("doc:edit")).await.unwrap();
        store.assign_permission_to_role(role.id, perm.id).await.unwrap();
        store.assign_role_to_user(user.id, role.id).await.unwrap();

        store.delete_role(role.id).await.unwrap();

        let loaded = store.get_user(user.id).await.unwrap().unwrap();
        assert!(loaded.roles.is_empty());
        assert!(store.get_permission(perm.id).await.unwrap().is_some());
        assert!(matches!(
            store.delete_role(role.id).await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_permission_detaches_it_from_roles() {
        let store = InMemoryCredentialStore::new();
        let role = store.create_role(new_role("editor")).await.unwrap();
        let keep = store.create_permission(new_permission("doc:read")).await.unwrap();
        let drop = store.create_permission(new_permission("doc:edit")).await.unwrap();
        store.assign_permission_to_role(role.id, keep.id).await.unwrap();
        store.assign_permission_to_role(role.id, drop.id).await.unwrap();

        store.delete_permission(drop.id).await.unwrap();

        let role = store.get_role(role.id).await.unwrap().unwrap();
        let codes: Vec<&str> = role.permission_codes().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["doc:read"]);
    }

    #[tokio::test]
    async fn listing_filters_and_paginates_in_insertion_order() {
        let store = InMemoryCredentialStore::new();
        for name in ["anna", "annabel", "ben", "hannah"] {
            store
                .create_user(record(name, &format!("{name}@example.com")))
                .await
                .unwrap();
        }

        let filter = UserFilter {
            username: Some("ANN".to_string()),
            ..Default::default()
        };
        let names: Vec<String> = store
            .list_users(&filter, Page::default())
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["anna", "annabel", "hannah"]);

        let page = store
            .list_users(&UserFilter::default(), Page::new(Some(1), Some(2)))
            .await
            .unwrap();
        let names: Vec<&str> = page.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["annabel", "ben"]);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = InMemoryCredentialStore::new();
        let first = store.create_user(record("erin", "erin@example.com")).await.unwrap();
        store.delete_user(first.id).await.unwrap();
        let second = store.create_user(record("erin", "erin@example.com")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn touch_last_login_records_timestamp() {
        let store = InMemoryCredentialStore::new();
        let user = store.create_user(record("fred", "fred@example.com")).await.unwrap();
        assert!(user.last_login.is_none());
        let at = Utc::now();
        store.touch_last_login(user.id, at).await.unwrap();
        let loaded = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_login, Some(at));
    }
}
