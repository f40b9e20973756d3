//! `omms-core` holds the shared building blocks for the identity core.
//!
//! This crate contains **pure** primitives (no storage, no transport).

pub mod entity;
pub mod error;
pub mod id;
pub mod page;
pub mod patch;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{PermissionId, RoleId, UserId};
pub use page::Page;
