//! Startup seeding of the built-in admin, roles and permission catalog.
//!
//! Safe to run on every start: rows are matched by natural key and only
//! missing ones are created.

use serde::Serialize;

use omms_auth::catalog::{
    ADMIN_EMAIL, ADMIN_USERNAME, ADMINISTRATOR_ROLE, BUILTIN_ROLES, PERMISSION_CATALOG,
};
use omms_auth::{NewPermission, NewRole, NewUser, Permission};
use omms_core::{DomainError, DomainResult};

use crate::directory::Directory;

/// What a bootstrap run created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub admin_created: bool,
    pub roles_created: usize,
    pub permissions_created: usize,
    pub grants_added: usize,
}

impl BootstrapReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub async fn bootstrap(directory: &Directory, admin_password: &str) -> DomainResult<BootstrapReport> {
    let mut report = BootstrapReport::default();
    let store = directory.store();

    if store.get_user_by_username(ADMIN_USERNAME).await?.is_none() {
        let admin = NewUser::new(ADMIN_USERNAME, ADMIN_EMAIL, admin_password).superuser();
        directory.create_user(admin).await?;
        report.admin_created = true;
    }

    for (name, description) in BUILTIN_ROLES {
        if store.get_role_by_name(name).await?.is_none() {
            directory
                .create_role(NewRole {
                    name: name.to_string(),
                    description: Some(description.to_string()),
                })
                .await?;
            tracing::info!(role = %name, "seeded role");
            report.roles_created += 1;
        }
    }

    let mut catalog: Vec<Permission> = Vec::with_capacity(PERMISSION_CATALOG.len());
    for entry in PERMISSION_CATALOG {
        let permission = match store.get_permission_by_code(entry.code).await? {
            Some(existing) => existing,
            None => {
                report.permissions_created += 1;
                directory
                    .create_permission(NewPermission {
                        code: entry.code.to_string(),
                        name: entry.name.to_string(),
                        description: Some(entry.description.to_string()),
                    })
                    .await?
            }
        };
        catalog.push(permission);
    }

    let admin_role = store
        .get_role_by_name(ADMINISTRATOR_ROLE)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("role '{ADMINISTRATOR_ROLE}'")))?;
    for permission in catalog {
        if !admin_role.has_permission(permission.code.as_str()) {
            store
                .assign_permission_to_role(admin_role.id, permission.id)
                .await?;
            report.grants_added += 1;
        }
    }

    if report.is_noop() {
        tracing::info!("bootstrap: nothing to seed");
    } else {
        tracing::info!(
            admin_created = report.admin_created,
            roles_created = report.roles_created,
            permissions_created = report.permissions_created,
            grants_added = report.grants_added,
            "bootstrap complete"
        );
    }
    Ok(report)
}
