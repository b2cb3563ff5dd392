//! Video owners.

use serde::{Deserialize, Serialize};

/// Owner of a video, used to address outcome notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

impl User {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Name used in notifications; empty when the account has none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}
