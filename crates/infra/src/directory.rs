//! Validated entry point to the credential store.
//!
//! Every write coming from the HTTP layer or the seeder goes through here:
//! input is validated, plaintext passwords are hashed, and only then does the
//! store see the data.

use omms_auth::{
    NewPermission, NewRole, NewUser, PasswordHasher, Permission, PermissionPatch, Role, RolePatch,
    User, UserPatch,
};
use omms_core::{DomainError, DomainResult, Page, PermissionId, RoleId, UserId};

use crate::store::{
    NewUserRecord, PermissionFilter, RoleFilter, SharedCredentialStore, UserChanges, UserFilter,
};

#[derive(Clone)]
pub struct Directory {
    store: SharedCredentialStore,
    hasher: PasswordHasher,
}

impl Directory {
    pub fn new(store: SharedCredentialStore, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &SharedCredentialStore {
        &self.store
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    // Users

    pub async fn create_user(&self, input: NewUser) -> DomainResult<User> {
        let input = input.validate()?;
        let record = NewUserRecord {
            password_hash: self.hasher.hash_blocking(input.password).await?,
            username: input.username,
            email: input.email,
            full_name: input.full_name,
            phone: input.phone,
            avatar: input.avatar,
            is_active: input.is_active,
            is_superuser: input.is_superuser,
        };
        let user = self.store.create_user(record).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn update_user(&self, id: UserId, patch: UserPatch) -> DomainResult<User> {
        let patch = patch.validate()?;
        let password_hash = match patch.password {
            Some(password) => Some(self.hasher.hash_blocking(password).await?),
            None => None,
        };
        let changes = UserChanges {
            username: patch.username,
            email: patch.email,
            password_hash,
            full_name: patch.full_name,
            phone: patch.phone,
            avatar: patch.avatar,
            is_active: patch.is_active,
            is_superuser: patch.is_superuser,
        };
        self.store.update_user(id, changes).await
    }

    pub async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        self.store.delete_user(id).await?;
        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }

    pub async fn get_user(&self, id: UserId) -> DomainResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {id}")))
    }

    pub async fn list_users(&self, filter: &UserFilter, page: Page) -> DomainResult<Vec<User>> {
        self.store.list_users(filter, page).await
    }

    pub async fn assign_role(&self, user_id: UserId, role_id: RoleId) -> DomainResult<User> {
        self.store.assign_role_to_user(user_id, role_id).await?;
        self.get_user(user_id).await
    }

    pub async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> DomainResult<User> {
        self.store.remove_role_from_user(user_id, role_id).await?;
        self.get_user(user_id).await
    }

    // Roles

    pub async fn create_role(&self, input: NewRole) -> DomainResult<Role> {
        self.store.create_role(input.validate()?).await
    }

    pub async fn update_role(&self, id: RoleId, patch: RolePatch) -> DomainResult<Role> {
        self.store.update_role(id, patch.validate()?).await
    }

    pub async fn delete_role(&self, id: RoleId) -> DomainResult<()> {
        self.store.delete_role(id).await
    }

    pub async fn get_role(&self, id: RoleId) -> DomainResult<Role> {
        self.store
            .get_role(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {id}")))
    }

    pub async fn list_roles(&self, filter: &RoleFilter, page: Page) -> DomainResult<Vec<Role>> {
        self.store.list_roles(filter, page).await
    }

    pub async fn grant_permission(&self, role_id: RoleId, permission_id: PermissionId) -> DomainResult<Role> {
        self.store.assign_permission_to_role(role_id, permission_id).await?;
        self.get_role(role_id).await
    }

    pub async fn revoke_permission(&self, role_id: RoleId, permission_id: PermissionId) -> DomainResult<Role> {
        self.store.remove_permission_from_role(role_id, permission_id).await?;
        self.get_role(role_id).await
    }

    // Permissions

    pub async fn create_permission(&self, input: NewPermission) -> DomainResult<Permission> {
        self.store.create_permission(input.validate()?).await
    }

    pub async fn update_permission(&self, id: PermissionId, patch: PermissionPatch) -> DomainResult<Permission> {
        self.store.update_permission(id, patch.validate()?).await
    }

    pub async fn delete_permission(&self, id: PermissionId) -> DomainResult<()> {
        self.store.delete_permission(id).await
    }

    pub async fn get_permission(&self, id: PermissionId) -> DomainResult<Permission> {
        self.store
            .get_permission(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("permission {id}")))
    }

    pub async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        page: Page,
    ) -> DomainResult<Vec<Permission>> {
        self.store.list_permissions(filter, page).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::InMemoryCredentialStore;

    fn directory() -> Directory {
        Directory::new(
            Arc::new(InMemoryCredentialStore::new()),
            PasswordHasher::with_cost(8, 1).unwrap(),
        )
    }

    #[tokio::test]
    async fn stored_password_is_a_verifiable_hash() {
        let dir = directory();
        let user = dir
            .create_user(NewUser::new("alice", "alice@example.com", "secret1"))
            .await
            .unwrap();
        assert_ne!(user.password_hash.as_str(), "secret1");
        assert!(dir.hasher().verify("secret1", &user.password_hash));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let dir = directory();
        let err = dir
            .create_user(NewUser::new("al", "alice@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        let all = dir.list_users(&UserFilter::default(), Page::default()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn password_update_rehashes() {
        let dir = directory();
        let user = dir
            .create_user(NewUser::new("bob", "bob@example.com", "secret1"))
            .await
            .unwrap();
        let patch = UserPatch {
            password: Some("secret2".to_string()),
            ..Default::default()
        };
        let updated = dir.update_user(user.id, patch).await.unwrap();
        assert!(dir.hasher().verify("secret2", &updated.password_hash));
        assert!(!dir.hasher().verify("secret1", &updated.password_hash));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let dir = directory();
        assert!(matches!(dir.get_user(UserId::new(1)).await, Err(DomainError::NotFound(_))));
        assert!(matches!(dir.get_role(RoleId::new(1)).await, Err(DomainError::NotFound(_))));
        assert!(matches!(
            dir.get_permission(PermissionId::new(1)).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
