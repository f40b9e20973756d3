use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omms_core::{DomainError, Entity, RoleId};

use crate::{Permission, PermissionCode};

/// Role name as carried in tokens and compared by role guards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A role row with its permissions eagerly attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn permission_codes(&self) -> impl Iterator<Item = &PermissionCode> {
        self.permissions.iter().map(|p| &p.code)
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.iter().any(|p| p.code.as_str() == code)
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewRole {
    pub fn validate(self) -> Result<Self, DomainError> {
        Ok(Self {
            name: validate_role_name(&self.name)?,
            description: self.description,
        })
    }
}

/// Partial update for a role; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RolePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "omms_core::patch::present")]
    pub description: Option<Option<String>>,
}

impl RolePatch {
    pub fn validate(self) -> Result<Self, DomainError> {
        Ok(Self {
            name: self.name.as_deref().map(validate_role_name).transpose()?,
            description: self.description,
        })
    }
}

fn validate_role_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("role name cannot be empty"));
    }
    if name.chars().count() > 50 {
        return Err(DomainError::validation("role name must be at most 50 characters"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_role_name_is_rejected() {
        let err = NewRole {
            name: "   ".to_string(),
            description: None,
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("role name"));
    }

    #[test]
    fn role_names_order_lexically() {
        let mut names = vec![RoleName::new("viewer"), RoleName::new("administrator")];
        names.sort();
        assert_eq!(names[0].as_str(), "administrator");
    }
}
