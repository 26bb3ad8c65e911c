//! Authorizing group membership
//!
//! Keeps the group in line with the trust-level policy without fighting
//! manual additions:
//!
//! - a force-excluded user is removed if present;
//! - any other user at or above the minimum trust level is added if missing;
//! - nobody is removed just for being below the threshold.
//!
//! Every membership change is mirrored onto the user's stream setting, so the
//! live status join never has to re-derive membership.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::policy::StreamingPolicy;
use crate::{
    config::StreamersSettings,
    models::{
        Group, MembershipDecision, MembershipEvent, MembershipOutcome, NewStreamSetting,
        PlatformUser, StreamSettingChanges, SweepReport, UserId,
    },
    repository::{StreamSettingStore, UserDirectory},
    Result,
};

/// Default page size of the eligible-user scan
pub const DEFAULT_BATCH_SIZE: u32 = 500;

/// Whether a changed setting can change who belongs in the group.
///
/// Accepts both the bare field name and the host's `streamers_` prefixed one.
#[must_use]
pub fn settings_affect_group_membership(name: &str) -> bool {
    let name = name.trim();
    let name = name.strip_prefix("streamers_").unwrap_or(name);
    let name = match name {
        "force_exclude_from_streamers" => "force_exclude",
        other => other,
    };
    StreamersSettings::MEMBERSHIP_FIELDS.contains(&name)
}

/// Apply the membership rules to one user
#[must_use]
pub fn decide(settings: &StreamersSettings, user: &PlatformUser, is_member: bool) -> MembershipDecision {
    if settings.is_excluded(&user.username) {
        return if is_member {
            MembershipDecision::Remove
        } else {
            MembershipDecision::NoOp
        };
    }
    if !is_member && user.trust_level >= settings.min_trust_level {
        MembershipDecision::Add
    } else {
        MembershipDecision::NoOp
    }
}

#[derive(Clone)]
pub struct MembershipService {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn StreamSettingStore>,
    policy: StreamingPolicy,
    batch_size: u32,
}

impl std::fmt::Debug for MembershipService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipService")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl MembershipService {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn StreamSettingStore>) -> Self {
        Self {
            policy: StreamingPolicy::new(directory.clone()),
            directory,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Group the reconciler may manage, `None` when it must not touch anything
    async fn managed_group(&self, settings: &StreamersSettings) -> Result<Option<Group>> {
        if !settings.auto_manage_active() {
            return Ok(None);
        }
        self.policy.authorizing_group(settings).await
    }

    /// Reconcile a single user
    pub async fn ensure_membership(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
    ) -> Result<MembershipOutcome> {
        let Some(group) = self.managed_group(settings).await? else {
            return Ok(MembershipOutcome::Skipped);
        };
        let Some(user) = self.directory.find_user(user_id).await? else {
            return Ok(MembershipOutcome::Skipped);
        };

        let is_member = self.directory.is_member(group.id, user.id).await?;
        match decide(settings, &user, is_member) {
            MembershipDecision::Add => {
                self.add_to_group(settings, &group, &user).await?;
                Ok(MembershipOutcome::Added)
            }
            MembershipDecision::Remove => {
                self.remove_from_group(settings, &group, &user).await?;
                Ok(MembershipOutcome::Removed)
            }
            MembershipDecision::NoOp => Ok(MembershipOutcome::Unchanged),
        }
    }

    /// [`Self::ensure_membership`] for event hooks: failures are logged, never returned
    pub async fn ensure_membership_safely(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
    ) -> MembershipOutcome {
        match self.ensure_membership(settings, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Membership reconciliation failed");
                MembershipOutcome::Skipped
            }
        }
    }

    /// Bulk sweep: remove excluded members, then add every eligible user.
    ///
    /// The eligible population is read page by page. A failure for one user
    /// is logged and counted; the sweep carries on.
    pub async fn sync_all(&self, settings: &StreamersSettings) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let Some(group) = self.managed_group(settings).await? else {
            debug!("Membership sweep skipped");
            return Ok(report);
        };

        if !settings.force_exclude.is_empty() {
            let excluded = self
                .directory
                .members_with_usernames(group.id, &settings.force_exclude)
                .await?;
            for user in excluded {
                match self.remove_from_group(settings, &group, &user).await {
                    Ok(()) => report.removed += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(user_id = %user.id, group = %group.name, error = %e, "Could not remove user from group");
                    }
                }
            }
        }

        let mut after = None;
        loop {
            let page = self
                .directory
                .eligible_users_page(settings.min_trust_level, after, self.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            let full_page = page.len() >= self.batch_size as usize;

            for user in page.iter().filter(|u| !settings.is_excluded(&u.username)) {
                match self.add_if_missing(settings, &group, user).await {
                    Ok(true) => report.added += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(user_id = %user.id, group = %group.name, error = %e, "Could not add user to group");
                    }
                }
            }

            if !full_page {
                break;
            }
        }

        info!(
            group = %group.name,
            added = report.added,
            removed = report.removed,
            failed = report.failed,
            "Membership sweep finished"
        );
        Ok(report)
    }

    async fn add_if_missing(
        &self,
        settings: &StreamersSettings,
        group: &Group,
        user: &PlatformUser,
    ) -> Result<bool> {
        if self.directory.is_member(group.id, user.id).await? {
            return Ok(false);
        }
        self.add_to_group(settings, group, user).await?;
        Ok(true)
    }

    async fn add_to_group(
        &self,
        settings: &StreamersSettings,
        group: &Group,
        user: &PlatformUser,
    ) -> Result<()> {
        self.directory.add_member(group.id, user.id).await?;
        info!(user_id = %user.id, group = %group.name, "Added user to group");
        self.mirror_safely(settings, user, true).await;
        Ok(())
    }

    async fn remove_from_group(
        &self,
        settings: &StreamersSettings,
        group: &Group,
        user: &PlatformUser,
    ) -> Result<()> {
        self.directory.remove_member(group.id, user.id).await?;
        info!(user_id = %user.id, group = %group.name, "Removed user from group");
        self.mirror_safely(settings, user, false).await;
        Ok(())
    }

    async fn mirror_safely(&self, settings: &StreamersSettings, user: &PlatformUser, member: bool) {
        if let Err(e) = self.mirror_membership(settings, user, member).await {
            warn!(user_id = %user.id, error = %e, "Could not mirror membership onto stream setting");
        }
    }

    /// Make the user's setting follow a membership change.
    ///
    /// Joining creates or re-enables the setting, unless the user is
    /// force-excluded; leaving disables it.
    pub async fn mirror_membership(
        &self,
        settings: &StreamersSettings,
        user: &PlatformUser,
        member: bool,
    ) -> Result<()> {
        if !member || settings.is_excluded(&user.username) {
            if let Some(setting) = self.store.find_by_user(user.id).await? {
                if setting.enabled {
                    self.store
                        .update(user.id, StreamSettingChanges::enabled(false))
                        .await?;
                }
            }
            return Ok(());
        }

        let setting = self
            .store
            .find_or_create(user.id, NewStreamSetting::for_user(user.id))
            .await?;
        if !setting.enabled {
            self.store
                .update(user.id, StreamSettingChanges::enabled(true))
                .await?;
        }
        Ok(())
    }

    /// Apply one host event
    pub async fn handle_event(
        &self,
        settings: &StreamersSettings,
        event: &MembershipEvent,
    ) -> Result<()> {
        match event {
            MembershipEvent::UserAddedToGroup { user_id, group } => {
                self.group_changed(settings, *user_id, group, true).await
            }
            MembershipEvent::UserRemovedFromGroup { user_id, group } => {
                self.group_changed(settings, *user_id, group, false).await
            }
            MembershipEvent::UserTrustLevelChanged { user_id }
            | MembershipEvent::UserCreated { user_id } => {
                self.ensure_membership_safely(settings, *user_id).await;
                Ok(())
            }
            MembershipEvent::SettingChanged { name } => {
                if settings_affect_group_membership(name) {
                    info!(setting = %name, "Membership setting changed, running sweep");
                    self.sync_all(settings).await?;
                }
                Ok(())
            }
        }
    }

    async fn group_changed(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
        group: &str,
        added: bool,
    ) -> Result<()> {
        if !settings.enabled {
            return Ok(());
        }
        let wanted = settings.normalized_group_name();
        if wanted.is_empty() || group.trim().to_lowercase() != wanted {
            return Ok(());
        }
        let Some(user) = self.directory.find_user(user_id).await? else {
            return Ok(());
        };

        self.mirror_membership(settings, &user, added).await?;
        if added {
            // An excluded user added by hand is taken out again
            self.ensure_membership_safely(settings, user_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::GroupId,
        repository::{MemoryDirectory, MemoryStreamSettingStore},
        test_helpers::{fixture, settings, user, STREAMERS_GROUP},
    };

    const GROUP: GroupId = GroupId(STREAMERS_GROUP);

    fn service(
        store: &Arc<MemoryStreamSettingStore>,
        directory: &Arc<MemoryDirectory>,
    ) -> MembershipService {
        MembershipService::new(directory.clone(), store.clone())
    }

    #[test]
    fn test_decide() {
        let settings = StreamersSettings {
            force_exclude: vec!["mallory".to_string()],
            ..settings()
        };

        assert_eq!(decide(&settings, &user(1, "alice", 2), false), MembershipDecision::Add);
        assert_eq!(decide(&settings, &user(1, "alice", 2), true), MembershipDecision::NoOp);
        assert_eq!(decide(&settings, &user(2, "bob", 1), false), MembershipDecision::NoOp);
        // Below the threshold but added by hand: left alone
        assert_eq!(decide(&settings, &user(2, "bob", 1), true), MembershipDecision::NoOp);
        assert_eq!(decide(&settings, &user(3, "Mallory", 4), true), MembershipDecision::Remove);
        assert_eq!(decide(&settings, &user(3, "mallory", 4), false), MembershipDecision::NoOp);
    }

    #[test]
    fn test_settings_affect_group_membership() {
        assert!(settings_affect_group_membership("min_trust_level"));
        assert!(settings_affect_group_membership("streamers_group_name"));
        assert!(settings_affect_group_membership("streamers_auto_manage_group"));
        assert!(settings_affect_group_membership("streamers_force_exclude_from_streamers"));
        assert!(settings_affect_group_membership("force_exclude"));
        assert!(!settings_affect_group_membership("streams_cache_seconds"));
        assert!(!settings_affect_group_membership("enabled"));
    }

    #[tokio::test]
    async fn test_ensure_membership_adds_and_enables() {
        let (store, directory) = fixture();
        directory.insert_user(user(7, "alice", 3));

        let outcome = service(&store, &directory)
            .ensure_membership(&settings(), UserId(7))
            .await
            .unwrap();

        assert_eq!(outcome, MembershipOutcome::Added);
        assert!(directory.members_of(GROUP).contains(&UserId(7)));
        let setting = store.find_by_user(UserId(7)).await.unwrap().unwrap();
        assert!(setting.enabled);
        assert_eq!(setting.mount, "/u/7");
    }

    #[tokio::test]
    async fn test_manual_member_below_threshold_is_kept() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "bob", 0));
        directory.seed_member(GROUP, UserId(1));

        let outcome = service(&store, &directory)
            .ensure_membership(&settings(), UserId(1))
            .await
            .unwrap();

        assert_eq!(outcome, MembershipOutcome::Unchanged);
        assert!(directory.members_of(GROUP).contains(&UserId(1)));
    }

    #[tokio::test]
    async fn test_excluded_member_is_removed_and_disabled() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "mallory", 4));
        let service = service(&store, &directory);
        service.ensure_membership(&settings(), UserId(1)).await.unwrap();
        assert!(store.find_by_user(UserId(1)).await.unwrap().unwrap().enabled);

        let settings = StreamersSettings {
            force_exclude: vec!["mallory".to_string()],
            ..settings()
        };
        let outcome = service.ensure_membership(&settings, UserId(1)).await.unwrap();

        assert_eq!(outcome, MembershipOutcome::Removed);
        assert!(directory.members_of(GROUP).is_empty());
        assert!(!store.find_by_user(UserId(1)).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_skipped_unless_auto_managed() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 4));
        let service = service(&store, &directory);

        let manual = StreamersSettings {
            auto_manage_group: false,
            ..settings()
        };
        assert_eq!(
            service.ensure_membership(&manual, UserId(1)).await.unwrap(),
            MembershipOutcome::Skipped
        );
        assert_eq!(service.sync_all(&manual).await.unwrap(), SweepReport::default());

        let no_group = StreamersSettings {
            group_name: "missing".to_string(),
            ..settings()
        };
        assert_eq!(
            service.ensure_membership(&no_group, UserId(1)).await.unwrap(),
            MembershipOutcome::Skipped
        );
        assert_eq!(directory.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (store, directory) = fixture();
        for (id, name, trust) in [(1, "alice", 3), (2, "bob", 1), (3, "carol", 2), (4, "mallory", 4), (5, "erin", 2)] {
            directory.insert_user(user(id, name, trust));
        }
        directory.seed_member(GROUP, UserId(4));
        directory.seed_member(GROUP, UserId(2));
        let settings = StreamersSettings {
            force_exclude: vec!["mallory".to_string()],
            ..settings()
        };
        let service = service(&store, &directory).with_batch_size(2);

        let first = service.sync_all(&settings).await.unwrap();
        assert_eq!(
            first,
            SweepReport {
                added: 3,
                removed: 1,
                failed: 0
            }
        );
        let mutations = directory.mutation_count();

        let second = service.sync_all(&settings).await.unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(directory.mutation_count(), mutations);

        let members = directory.members_of(GROUP);
        // bob was added by hand and stays
        for id in [1, 2, 3, 5] {
            assert!(members.contains(&UserId(id)), "user {id} missing");
        }
        assert!(!members.contains(&UserId(4)));
    }

    #[tokio::test]
    async fn test_sweep_never_adds_excluded_users() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "Mallory", 4));
        let settings = StreamersSettings {
            force_exclude: vec!["mallory".to_string()],
            ..settings()
        };

        let report = service(&store, &directory).sync_all(&settings).await.unwrap();

        assert_eq!(report.mutations(), 0);
        assert!(directory.members_of(GROUP).is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let (store, directory) = fixture();
        for id in 1..=4 {
            directory.insert_user(user(id, &format!("user{id}"), 3));
        }
        directory.fail_mutations_for(UserId(2));

        let report = service(&store, &directory)
            .with_batch_size(1)
            .sync_all(&settings())
            .await
            .unwrap();

        assert_eq!(report.added, 3);
        assert_eq!(report.failed, 1);
        assert!(!directory.members_of(GROUP).contains(&UserId(2)));
        assert!(directory.members_of(GROUP).contains(&UserId(4)));
    }

    #[tokio::test]
    async fn test_group_events_mirror_settings() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 0));
        let service = service(&store, &directory);
        // Mirroring does not need auto-manage
        let settings = StreamersSettings {
            auto_manage_group: false,
            ..settings()
        };

        service
            .handle_event(
                &settings,
                &MembershipEvent::UserAddedToGroup {
                    user_id: UserId(1),
                    group: "Streamers".to_string(),
                },
            )
            .await
            .unwrap();
        let setting = store.find_by_user(UserId(1)).await.unwrap().unwrap();
        assert!(setting.enabled);
        assert_eq!(setting.mount, "/u/1");

        service
            .handle_event(
                &settings,
                &MembershipEvent::UserRemovedFromGroup {
                    user_id: UserId(1),
                    group: "streamers".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(!store.find_by_user(UserId(1)).await.unwrap().unwrap().enabled);

        // Other groups are ignored
        service
            .handle_event(
                &settings,
                &MembershipEvent::UserAddedToGroup {
                    user_id: UserId(1),
                    group: "moderators".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(!store.find_by_user(UserId(1)).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_excluded_user_added_by_hand_is_taken_out() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "mallory", 4));
        directory.seed_member(GROUP, UserId(1));
        let settings = StreamersSettings {
            force_exclude: vec!["mallory".to_string()],
            ..settings()
        };

        service(&store, &directory)
            .handle_event(
                &settings,
                &MembershipEvent::UserAddedToGroup {
                    user_id: UserId(1),
                    group: "streamers".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(directory.members_of(GROUP).is_empty());
        assert!(store.find_by_user(UserId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trust_level_event_and_setting_change() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 1));
        directory.insert_user(user(2, "bob", 1));
        let service = service(&store, &directory);

        directory.set_trust_level(UserId(1), 2);
        service
            .handle_event(&settings(), &MembershipEvent::UserTrustLevelChanged { user_id: UserId(1) })
            .await
            .unwrap();
        assert!(directory.members_of(GROUP).contains(&UserId(1)));

        let lowered = StreamersSettings {
            min_trust_level: 1,
            ..settings()
        };
        service
            .handle_event(
                &lowered,
                &MembershipEvent::SettingChanged {
                    name: "min_trust_level".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(directory.members_of(GROUP).contains(&UserId(2)));
    }
}
