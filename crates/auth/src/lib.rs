//! `omms-auth` is the authentication and authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it owns the
//! user/role/permission model, password hashing, the token service and the
//! guard that turns a bearer token into an authorization decision.

pub mod catalog;
pub mod claims;
pub mod guard;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod token;
pub mod user;

pub use claims::{TokenClaims, TokenError, validate_claims};
pub use guard::{AuthzError, Guard, Requirement, authenticate, bearer_token};
pub use password::{PasswordDigest, PasswordHasher};
pub use permissions::{NewPermission, Permission, PermissionCode, PermissionPatch};
pub use principal::{Principal, TokenSubject};
pub use roles::{NewRole, Role, RoleName, RolePatch};
pub use token::{IssuedToken, TokenConfig, TokenService};
pub use user::{NewUser, User, UserPatch};
