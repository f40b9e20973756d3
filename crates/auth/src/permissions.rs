use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omms_core::{DomainError, Entity, PermissionId};

/// Permission code (e.g. "user:list").
///
/// Codes are stable machine-readable strings scoped by resource
/// (`resource:action`). They are what tokens carry and what guards compare.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionCode(Cow<'static, str>);

impl PermissionCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource part of `resource:action`, if the code follows that shape.
    pub fn resource(&self) -> Option<&str> {
        self.0.split_once(':').map(|(resource, _)| resource)
    }
}

impl core::fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionCode {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PermissionCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub id: PermissionId,
    pub code: PermissionCode,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> PermissionId {
        self.id
    }
}

/// Input for creating a permission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewPermission {
    /// Validate and normalize (trims code and name).
    pub fn validate(self) -> Result<Self, DomainError> {
        Ok(Self {
            code: validate_code(&self.code)?,
            name: validate_name(&self.name)?,
            description: self.description,
        })
    }
}

/// Partial update for a permission; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionPatch {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "omms_core::patch::present")]
    pub description: Option<Option<String>>,
}

impl PermissionPatch {
    pub fn validate(self) -> Result<Self, DomainError> {
        Ok(Self {
            code: self.code.as_deref().map(validate_code).transpose()?,
            name: self.name.as_deref().map(validate_name).transpose()?,
            description: self.description,
        })
    }
}

fn validate_code(code: &str) -> Result<String, DomainError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation("permission code cannot be empty"));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("permission code cannot contain whitespace"));
    }
    Ok(code.to_string())
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("permission name cannot be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_exposes_resource() {
        assert_eq!(PermissionCode::new("user:list").resource(), Some("user"));
        assert_eq!(PermissionCode::new("*").resource(), None);
    }

    #[test]
    fn new_permission_is_trimmed() {
        let p = NewPermission {
            code: "  report:export ".to_string(),
            name: " Export reports ".to_string(),
            description: None,
        }
        .validate()
        .unwrap();
        assert_eq!(p.code, "report:export");
        assert_eq!(p.name, "Export reports");
    }

    #[test]
    fn code_with_whitespace_is_rejected() {
        let err = NewPermission {
            code: "user list".to_string(),
            name: "List".to_string(),
            description: None,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn empty_patch_is_valid() {
        assert_eq!(PermissionPatch::default().validate().unwrap(), PermissionPatch::default());
    }
}
