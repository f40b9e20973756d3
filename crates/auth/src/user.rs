//! User accounts: the entity, its inputs, and field validation.
//!
//! Validation here is purely syntactic. Uniqueness of `username` and `email`
//! is enforced by the credential store, which owns persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use omms_core::{DomainError, Entity, UserId};

use crate::{PasswordDigest, Role, RoleName};

// ─────────────────────────────────────────────────────────────────────────────
// Entity
// ─────────────────────────────────────────────────────────────────────────────

/// A user account with its roles eagerly attached.
///
/// # Invariants
/// - `username` and `email` are globally unique (store-enforced).
/// - `password_hash` is an irreversible digest and is never serialized.
/// - `is_superuser` implies every permission, regardless of `roles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: PasswordDigest,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub roles: Vec<Role>,
}

impl User {
    pub fn role_names(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.iter().map(|r| &r.name)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name.as_str() == name)
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// Input for registering a user. Carries the plaintext password, which is
/// hashed before it reaches the store.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .field("is_superuser", &self.is_superuser)
            .finish_non_exhaustive()
    }
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            full_name: None,
            phone: None,
            avatar: None,
            is_active: true,
            is_superuser: false,
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    /// Validate every field and normalize the email.
    pub fn validate(self) -> Result<Self, DomainError> {
        validate_username(&self.username)?;
        validate_password(&self.password)?;
        if let Some(phone) = &self.phone {
            validate_phone(phone)?;
        }
        Ok(Self {
            email: normalize_email(&self.email)?,
            ..self
        })
    }
}

/// Partial update for a user; `None` leaves the field untouched. The
/// nullable profile fields take `Some(None)` (JSON `null`) to clear.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "omms_core::patch::present")]
    pub full_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "omms_core::patch::present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "omms_core::patch::present")]
    pub avatar: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_superuser: Option<bool>,
}

impl core::fmt::Debug for UserPatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserPatch")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("is_active", &self.is_active)
            .field("is_superuser", &self.is_superuser)
            .finish_non_exhaustive()
    }
}

impl UserPatch {
    pub fn validate(self) -> Result<Self, DomainError> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        if let Some(Some(phone)) = &self.phone {
            validate_phone(phone)?;
        }
        let email = self.email.as_deref().map(normalize_email).transpose()?;
        Ok(Self { email, ..self })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Field rules
// ─────────────────────────────────────────────────────────────────────────────

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 50;
pub const PASSWORD_MIN_LEN: usize = 6;
pub const PHONE_DIGITS: usize = 11;

/// 3–50 characters of `[A-Za-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<(), DomainError> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::validation(
            "username may only contain letters, digits, underscores and hyphens",
        ));
    }
    Ok(())
}

/// Basic structural check; returns the trimmed, lower-cased address.
pub fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation("invalid email format"));
    };
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(email)
}

pub fn validate_phone(phone: &str) -> Result<(), DomainError> {
    if phone.len() != PHONE_DIGITS || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "phone must be exactly {PHONE_DIGITS} digits"
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
