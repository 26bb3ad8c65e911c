use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::UserId;

/// A currently broadcasting mount, as reported by the streaming server
///
/// Ephemeral: consumed once per aggregation cycle and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSourceRecord {
    /// Path component of the listen URL; `None` when the URL was unparseable
    pub mount: Option<String>,
    pub listen_url: String,
    pub title: Option<String>,
    pub server_name: Option<String>,
    pub listeners: i64,
    pub bitrate: i64,
    pub stream_start: Option<String>,
}

impl LiveSourceRecord {
    /// Raw title, falling back to the server name
    #[must_use]
    pub fn raw_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.server_name.as_deref())
            .unwrap_or_default()
    }
}

/// A live stream joined with its owner, safe to hand to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStreamView {
    pub user_id: UserId,
    pub username: String,
    pub name: String,
    pub avatar_template: Option<String>,
    pub mount: String,
    pub listen_url: Option<String>,
    pub listeners: i64,
    pub bitrate: i64,
    pub title: String,
    pub stream_tag: Option<String>,
    pub stream_started_at: Option<String>,
}

/// One non-empty aggregation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub streams: Vec<LiveStreamView>,
    pub updated_at: DateTime<Utc>,
}
