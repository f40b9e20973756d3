//! Infrastructure layer: credential storage and the services built on it.

pub mod authn;
pub mod bootstrap;
pub mod directory;
pub mod resolver;
pub mod store;


pub use authn::{LoginResponse, LoginService};
pub use bootstrap::{BootstrapReport, bootstrap};
pub use directory::Directory;
pub use resolver::PermissionResolver;
pub use store::{
    CredentialStore, InMemoryCredentialStore, NewUserRecord, PermissionFilter,
    PostgresCredentialStore, RoleFilter, SharedCredentialStore, UserChanges, UserFilter,
};
