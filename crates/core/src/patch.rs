//! Partial-update fields that can clear a nullable column.
//!
//! `Option<Option<T>>`: `None` leaves the value alone, `Some(None)` clears it,
//! `Some(Some(v))` sets it.

use serde::{Deserialize, Deserializer};

/// Use as `#[serde(default, deserialize_with = "omms_core::patch::present")]`
/// so an explicit JSON `null` becomes `Some(None)` instead of `None`.
pub fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Resolve a nullable patch field against the stored value.
pub fn apply<T>(change: Option<Option<T>>, current: Option<T>) -> Option<T> {
    match change {
        Some(value) => value,
        None => current,
    }
}
