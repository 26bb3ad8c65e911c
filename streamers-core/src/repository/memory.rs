//! In-memory repositories
//!
//! Used when no database is configured and throughout the test suites.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{StreamSettingStore, UserDirectory};
use crate::{
    models::{
        Group, GroupId, NewStreamSetting, PlatformUser, StreamSettingChanges, UserId,
        UserStreamSetting,
    },
    validation::ValidationError,
    Error, Result,
};

/// Stream settings kept in a map keyed by user id
#[derive(Debug, Default)]
pub struct MemoryStreamSettingStore {
    settings: RwLock<HashMap<UserId, UserStreamSetting>>,
    fail_updates: AtomicUsize,
}

impl MemoryStreamSettingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` updates fail with an internal error
    pub fn fail_next_updates(&self, count: usize) {
        self.fail_updates.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.settings.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.read().is_empty()
    }

    fn take_failure(&self) -> bool {
        self.fail_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StreamSettingStore for MemoryStreamSettingStore {
    async fn find_by_user(&self, user_id: UserId) -> Result<Option<UserStreamSetting>> {
        Ok(self.settings.read().get(&user_id).cloned())
    }

    async fn find_or_create(
        &self,
        user_id: UserId,
        defaults: NewStreamSetting,
    ) -> Result<UserStreamSetting> {
        let mut settings = self.settings.write();
        if let Some(existing) = settings.get(&user_id) {
            return Ok(existing.clone());
        }
        if settings.values().any(|s| s.mount == defaults.mount) {
            return Err(ValidationError::MountTaken.into());
        }

        let now = Utc::now();
        let setting = UserStreamSetting {
            user_id,
            mount: defaults.mount,
            enabled: defaults.enabled,
            stream_key_digest: None,
            last_stream_started_at: None,
            stream_tag: None,
            created_at: now,
            updated_at: now,
        };
        settings.insert(user_id, setting.clone());
        Ok(setting)
    }

    async fn update(
        &self,
        user_id: UserId,
        changes: StreamSettingChanges,
    ) -> Result<UserStreamSetting> {
        if self.take_failure() {
            return Err(Error::Internal("injected store failure".to_string()));
        }

        let mut settings = self.settings.write();
        if let Some(mount) = &changes.mount {
            if settings
                .values()
                .any(|s| s.user_id != user_id && &s.mount == mount)
            {
                return Err(ValidationError::MountTaken.into());
            }
        }

        let setting = settings
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotFound(format!("stream setting for user {user_id}")))?;
        changes.apply_to(setting, Utc::now());
        Ok(setting.clone())
    }

    async fn mount_taken(&self, mount: &str, except: Option<UserId>) -> Result<bool> {
        Ok(self
            .settings
            .read()
            .values()
            .any(|s| Some(s.user_id) != except && s.mount == mount))
    }

    async fn enabled_for_users(&self, user_ids: &[UserId]) -> Result<Vec<UserStreamSetting>> {
        let wanted: HashSet<&UserId> = user_ids.iter().collect();
        let mut found: Vec<UserStreamSetting> = self
            .settings
            .read()
            .values()
            .filter(|s| s.enabled && wanted.contains(&s.user_id))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.user_id);
        Ok(found)
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: BTreeMap<UserId, PlatformUser>,
    groups: HashMap<GroupId, Group>,
    members: HashMap<GroupId, HashSet<UserId>>,
    failing: HashSet<UserId>,
    mutations: usize,
}

/// Users and groups kept in memory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: PlatformUser) {
        self.state.write().users.insert(user.id, user);
    }

    pub fn insert_group(&self, group: Group) {
        self.state.write().groups.insert(group.id, group);
    }

    pub fn set_trust_level(&self, user_id: UserId, trust_level: i32) {
        if let Some(user) = self.state.write().users.get_mut(&user_id) {
            user.trust_level = trust_level;
        }
    }

    /// Seed membership without counting it as a mutation
    pub fn seed_member(&self, group_id: GroupId, user_id: UserId) {
        self.state
            .write()
            .members
            .entry(group_id)
            .or_default()
            .insert(user_id);
    }

    /// Make every add/remove for this user fail
    pub fn fail_mutations_for(&self, user_id: UserId) {
        self.state.write().failing.insert(user_id);
    }

    /// Number of membership changes applied through the trait
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state.read().mutations
    }

    #[must_use]
    pub fn members_of(&self, group_id: GroupId) -> HashSet<UserId> {
        self.state
            .read()
            .members
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<Option<PlatformUser>> {
        Ok(self.state.read().users.get(&user_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<PlatformUser>> {
        let wanted = username.trim().to_lowercase();
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.username_lower() == wanted)
            .cloned())
    }

    async fn users_by_ids(&self, user_ids: &[UserId]) -> Result<Vec<PlatformUser>> {
        let state = self.state.read();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(None);
        }
        Ok(self
            .state
            .read()
            .groups
            .values()
            .find(|g| g.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .members
            .get(&group_id)
            .is_some_and(|m| m.contains(&user_id)))
    }

    async fn member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        let mut ids: Vec<UserId> = self.members_of(group_id).into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    async fn members_with_usernames(
        &self,
        group_id: GroupId,
        usernames: &[String],
    ) -> Result<Vec<PlatformUser>> {
        let state = self.state.read();
        let Some(members) = state.members.get(&group_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .users
            .values()
            .filter(|u| members.contains(&u.id) && usernames.contains(&u.username_lower()))
            .cloned()
            .collect())
    }

    async fn eligible_users_page(
        &self,
        min_trust_level: i32,
        after: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<PlatformUser>> {
        let state = self.state.read();
        Ok(state
            .users
            .values()
            .filter(|u| after.is_none_or(|after| u.id > after))
            .filter(|u| u.trust_level >= min_trust_level)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let mut state = self.state.write();
        if state.failing.contains(&user_id) {
            return Err(Error::Internal(format!("cannot add user {user_id}")));
        }
        if state.members.entry(group_id).or_default().insert(user_id) {
            state.mutations += 1;
        }
        Ok(())
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let mut state = self.state.write();
        if state.failing.contains(&user_id) {
            return Err(Error::Internal(format!("cannot remove user {user_id}")));
        }
        if state
            .members
            .get_mut(&group_id)
            .is_some_and(|m| m.remove(&user_id))
        {
            state.mutations += 1;
        }
        Ok(())
    }
}
