use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use omms_core::UserId;

use crate::{PermissionCode, RoleName};

/// Identity plus authorization snapshot, as minted into a token.
///
/// Built by the login flow from a user and its resolved permissions; the
/// token service never consults storage itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub username: String,
    pub roles: BTreeSet<RoleName>,
    pub permissions: BTreeSet<PermissionCode>,
    pub is_superuser: bool,
}

impl TokenSubject {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            is_superuser: false,
        }
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionCode>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }
}

/// The authenticated caller of a request, reconstructed from a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    #[serde(flatten)]
    pub subject: TokenSubject,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn user_id(&self) -> UserId {
        self.subject.user_id
    }

    pub fn username(&self) -> &str {
        &self.subject.username
    }

    pub fn is_superuser(&self) -> bool {
        self.subject.is_superuser
    }

    pub fn roles(&self) -> &BTreeSet<RoleName> {
        &self.subject.roles
    }

    pub fn permissions(&self) -> &BTreeSet<PermissionCode> {
        &self.subject.permissions
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.subject.roles.iter().any(|r| r.as_str() == role)
    }

    /// Explicit grant only; superuser bypass is the guard's concern.
    pub fn has_permission(&self, code: &str) -> bool {
        self.subject.permissions.iter().any(|p| p.as_str() == code)
    }
}
