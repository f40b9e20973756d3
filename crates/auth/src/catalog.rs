//! Built-in accounts, roles and the permission catalog seeded at startup.

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const DEFAULT_ADMIN_PASSWORD: &str = "Admin@123";

pub const ADMINISTRATOR_ROLE: &str = "administrator";
pub const STANDARD_USER_ROLE: &str = "standard user";

/// Permission codes guarded by the HTTP surface.
pub mod codes {
    pub const USER_LIST: &str = "user:list";
    pub const USER_READ: &str = "user:read";
    pub const USER_CREATE: &str = "user:create";
    pub const USER_UPDATE: &str = "user:update";
    pub const USER_DELETE: &str = "user:delete";
    pub const USER_ASSIGN_ROLE: &str = "user:assign_role";
    pub const USER_REMOVE_ROLE: &str = "user:remove_role";
    pub const USER_READ_PERMISSIONS: &str = "user:read_permissions";

    pub const ROLE_LIST: &str = "role:list";
    pub const ROLE_READ: &str = "role:read";
    pub const ROLE_CREATE: &str = "role:create";
    pub const ROLE_UPDATE: &str = "role:update";
    pub const ROLE_DELETE: &str = "role:delete";
    pub const ROLE_ASSIGN_PERMISSION: &str = "role:assign_permission";
    pub const ROLE_REMOVE_PERMISSION: &str = "role:remove_permission";

    pub const PERMISSION_LIST: &str = "permission:list";
    pub const PERMISSION_READ: &str = "permission:read";
    pub const PERMISSION_CREATE: &str = "permission:create";
    pub const PERMISSION_UPDATE: &str = "permission:update";
    pub const PERMISSION_DELETE: &str = "permission:delete";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

const fn entry(code: &'static str, name: &'static str, description: &'static str) -> CatalogEntry {
    CatalogEntry {
        code,
        name,
        description,
    }
}

pub static PERMISSION_CATALOG: &[CatalogEntry] = &[
    entry(codes::USER_LIST, "List users", "View the list of users"),
    entry(codes::USER_READ, "Read user", "View a single user"),
    entry(codes::USER_CREATE, "Create user", "Register new users"),
    entry(codes::USER_UPDATE, "Update user", "Modify user details"),
    entry(codes::USER_DELETE, "Delete user", "Remove users"),
    entry(codes::USER_ASSIGN_ROLE, "Assign role", "Grant a role to a user"),
    entry(codes::USER_REMOVE_ROLE, "Remove role", "Revoke a role from a user"),
    entry(codes::USER_READ_PERMISSIONS, "Read user permissions", "View a user's effective permissions"),
    entry(codes::ROLE_LIST, "List roles", "View the list of roles"),
    entry(codes::ROLE_READ, "Read role", "View a single role"),
    entry(codes::ROLE_CREATE, "Create role", "Define new roles"),
    entry(codes::ROLE_UPDATE, "Update role", "Modify role details"),
    entry(codes::ROLE_DELETE, "Delete role", "Remove roles"),
    entry(codes::ROLE_ASSIGN_PERMISSION, "Assign permission", "Grant a permission to a role"),
    entry(codes::ROLE_REMOVE_PERMISSION, "Remove permission", "Revoke a permission from a role"),
    entry(codes::PERMISSION_LIST, "List permissions", "View the permission catalog"),
    entry(codes::PERMISSION_READ, "Read permission", "View a single permission"),
    entry(codes::PERMISSION_CREATE, "Create permission", "Add permissions to the catalog"),
    entry(codes::PERMISSION_UPDATE, "Update permission", "Modify permission details"),
    entry(codes::PERMISSION_DELETE, "Delete permission", "Remove permissions from the catalog"),
];

/// Built-in roles with their descriptions.
pub static BUILTIN_ROLES: &[(&str, &str)] = &[
    (ADMINISTRATOR_ROLE, "Full access to user, role and permission management"),
    (STANDARD_USER_ROLE, "Regular account without management rights"),
];
