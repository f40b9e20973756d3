use std::collections::BTreeSet;

use omms_auth::{PermissionCode, User};
use omms_core::{DomainError, DomainResult, UserId};

use crate::store::SharedCredentialStore;

/// Computes a user's effective permission set.
///
/// Consulted at login and for explicit permission listings, never per
/// protected request.
#[derive(Clone)]
pub struct PermissionResolver {
    store: SharedCredentialStore,
}

impl PermissionResolver {
    pub fn new(store: SharedCredentialStore) -> Self {
        Self { store }
    }

    pub async fn resolve_user_permissions(&self, user_id: UserId) -> DomainResult<BTreeSet<PermissionCode>> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {user_id}")))?;
        self.resolve(&user).await
    }

    /// Superusers get every code in the catalog, read fresh; everyone else
    /// gets the union over their roles.
    pub async fn resolve(&self, user: &User) -> DomainResult<BTreeSet<PermissionCode>> {
        if user.is_superuser {
            return Ok(self.store.all_permission_codes().await?.into_iter().collect());
        }
        Ok(user
            .roles
            .iter()
            .flat_map(|role| role.permission_codes().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use omms_auth::{NewPermission, NewRole, PasswordDigest};

    use super::*;
    use crate::store::{CredentialStore, InMemoryCredentialStore, NewUserRecord};

    async fn user(store: &InMemoryCredentialStore, name: &str, su: bool) -> User {
        store
            .create_user(NewUserRecord {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: PasswordDigest::from_stored("$argon2id$stub"),
                full_name: None,
                phone: None,
                avatar: None,
                is_active: true,
                is_superuser: su,
            })
            .await
            .unwrap()
    }

    async fn permission(store: &InMemoryCredentialStore, code: &str) -> omms_auth::Permission {
        store
            .create_permission(NewPermission {
                code: code.to_string(),
                name: code.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    async fn role(store: &InMemoryCredentialStore, name: &str) -> omms_auth::Role {
        store
            .create_role(NewRole {
                name: name.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    fn codes(set: &BTreeSet<PermissionCode>) -> Vec<&str> {
        set.iter().map(|c| c.as_str()).collect()
    }

    #[tokio::test]
    async fn union_over_roles_without_duplicates() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let u = user(&store, "alice", false).await;
        let list = permission(&store, "user:list").await;
        let read = permission(&store, "user:read").await;
        let create = permission(&store, "user:create").await;
        let a = role(&store, "a").await;
        let b = role(&store, "b").await;
        store.assign_permission_to_role(a.id, list.id).await.unwrap();
        store.assign_permission_to_role(a.id, read.id).await.unwrap();
        store.assign_permission_to_role(b.id, read.id).await.unwrap();
        store.assign_permission_to_role(b.id, create.id).await.unwrap();
        store.assign_role_to_user(u.id, a.id).await.unwrap();
        store.assign_role_to_user(u.id, b.id).await.unwrap();

        let resolver = PermissionResolver::new(store.clone());
        let perms = resolver.resolve_user_permissions(u.id).await.unwrap();
        assert_eq!(codes(&perms), vec!["user:create", "user:list", "user:read"]);
    }

    #[tokio::test]
    async fn user_without_roles_has_no_permissions() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let u = user(&store, "bob", false).await;
        permission(&store, "user:list").await;
        let resolver = PermissionResolver::new(store.clone());
        assert!(resolver.resolve_user_permissions(u.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn superuser_sees_catalog_as_it_is_now() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let root = user(&store, "root", true).await;
        permission(&store, "user:list").await;
        let resolver = PermissionResolver::new(store.clone());
        assert_eq!(resolver.resolve_user_permissions(root.id).await.unwrap().len(), 1);

        permission(&store, "report:export").await;
        let perms = resolver.resolve_user_permissions(root.id).await.unwrap();
        assert_eq!(codes(&perms), vec!["report:export", "user:list"]);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let resolver = PermissionResolver::new(Arc::new(InMemoryCredentialStore::new()));
        let err = resolver
            .resolve_user_permissions(UserId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
