use serde::{Deserialize, Serialize};

/// Offset pagination for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Number of rows to skip (0-based).
    pub skip: u32,
    /// Maximum number of rows to return.
    pub limit: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(skip: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Everything, for internal callers such as the seeder.
    pub fn all() -> Self {
        Self {
            skip: 0,
            limit: u32::MAX,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
