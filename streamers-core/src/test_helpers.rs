//! Shared fixtures for unit tests

use std::sync::Arc;

use crate::{
    config::StreamersSettings,
    models::{Group, GroupId, PlatformUser, UserId},
    repository::{MemoryDirectory, MemoryStreamSettingStore},
};

pub const STREAMERS_GROUP: i64 = 100;

pub fn user(id: i64, username: &str, trust_level: i32) -> PlatformUser {
    PlatformUser {
        id: UserId(id),
        username: username.to_string(),
        name: None,
        avatar_template: Some(format!("/user_avatar/{username}/{{size}}.png")),
        trust_level,
    }
}

pub fn group(id: i64, name: &str) -> Group {
    Group {
        id: GroupId(id),
        name: name.to_string(),
    }
}

/// Feature on, group `streamers`, min trust 2, auto-manage on
pub fn settings() -> StreamersSettings {
    StreamersSettings {
        enabled: true,
        source_auth_enabled: true,
        group_name: "streamers".to_string(),
        min_trust_level: 2,
        auto_manage_group: true,
        icecast_status_url: "https://radio.example.com/live/status-json.xsl".to_string(),
        stream_tag_options: vec!["Chill".to_string(), "Talk".to_string()],
        ..StreamersSettings::default()
    }
}

/// In-memory store and directory with the `streamers` group created
pub fn fixture() -> (Arc<MemoryStreamSettingStore>, Arc<MemoryDirectory>) {
    let store = Arc::new(MemoryStreamSettingStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert_group(group(STREAMERS_GROUP, "streamers"));
    (store, directory)
}
