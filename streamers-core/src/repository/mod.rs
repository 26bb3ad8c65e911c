//! Storage seams
//!
//! The core talks to two collaborators: the per-user stream settings store and
//! the host platform's user/group directory. Both are traits so the services
//! can run against Postgres in production and against memory in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    models::{
        Group, GroupId, NewStreamSetting, PlatformUser, StreamSettingChanges, UserId,
        UserStreamSetting,
    },
    Result,
};

pub use memory::{MemoryDirectory, MemoryStreamSettingStore};
pub use postgres::{PgStreamSettingStore, PgUserDirectory};

/// Keyed store of [`UserStreamSetting`] records
#[async_trait]
pub trait StreamSettingStore: Send + Sync {
    /// Look up the setting owned by a user
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<UserStreamSetting>>;

    /// Return the user's setting, creating it from `defaults` if missing
    async fn find_or_create(
        &self,
        user_id: UserId,
        defaults: NewStreamSetting,
    ) -> Result<UserStreamSetting>;

    /// Apply a partial update atomically.
    ///
    /// Returns `Error::NotFound` when the user has no setting.
    async fn update(
        &self,
        user_id: UserId,
        changes: StreamSettingChanges,
    ) -> Result<UserStreamSetting>;

    /// Whether `mount` is assigned to anyone other than `except`
    async fn mount_taken(&self, mount: &str, except: Option<UserId>) -> Result<bool>;

    /// All enabled settings owned by the given users
    async fn enabled_for_users(&self, user_ids: &[UserId]) -> Result<Vec<UserStreamSetting>>;
}

/// Read/write view of the host platform's users and groups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<Option<PlatformUser>>;

    /// Case-insensitive username lookup
    async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>>;

    async fn users_by_ids(&self, user_ids: &[UserId]) -> Result<Vec<PlatformUser>>;

    /// Case-insensitive group lookup
    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>>;

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool>;

    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>>;

    /// Members of the group whose lowercased username is in `usernames`
    async fn members_with_usernames(
        &self,
        group_id: GroupId,
        usernames: &[String],
    ) -> Result<Vec<PlatformUser>>;

    /// One page of users with `trust_level >= min_trust_level`, ordered by id,
    /// starting strictly after `after`
    async fn eligible_users_page(
        &self,
        min_trust_level: i32,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<PlatformUser>>;

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()>;

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()>;
}
