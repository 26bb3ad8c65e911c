use serde::{Deserialize, Serialize};

use super::id::{GroupId, UserId};

/// A user of the host platform, as seen through the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: UserId,
    pub username: String,
    pub name: Option<String>,
    pub avatar_template: Option<String>,
    pub trust_level: i32,
}

impl PlatformUser {
    /// Display name, falling back to the username
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }

    #[must_use]
    pub fn username_lower(&self) -> String {
        self.username.trim().to_lowercase()
    }
}

/// A group of the host platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}
