use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Association with an uploaded object (profile picture)
    #[serde(default)]
    pub profile_picture_key: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            profile_picture_key: None,
            profile_picture_url: None,
        }
    }
}

/// An uploaded object linked to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFile {
    pub key: String,
    pub file_url: String,
    pub created_at: DateTime<Utc>,
}
