//! Live stream aggregation
//!
//! Joins the sources the streaming server reports with the enabled settings
//! of authorizing group members. Any missing precondition, and any failure,
//! yields `None`: "no live data right now", never "nobody is live".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::policy::StreamingPolicy;
use crate::{
    config::StreamersSettings,
    models::{LiveSnapshot, LiveSourceRecord, LiveStreamView, PlatformUser, UserId, UserStreamSetting},
    repository::{StreamSettingStore, UserDirectory},
    validation::{sanitize_stream_tag, sanitize_text},
    Result,
};

pub use crate::provider::SourceStatusProvider;

#[derive(Clone)]
pub struct LiveStatusService {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn StreamSettingStore>,
    provider: Arc<dyn SourceStatusProvider>,
    policy: StreamingPolicy,
}

impl std::fmt::Debug for LiveStatusService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStatusService").finish_non_exhaustive()
    }
}

impl LiveStatusService {
    #[must_use]
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn StreamSettingStore>,
        provider: Arc<dyn SourceStatusProvider>,
    ) -> Self {
        Self {
            policy: StreamingPolicy::new(directory.clone()),
            directory,
            store,
            provider,
        }
    }

    /// Current live streams, or `None` when nothing can be reported
    pub async fn live_streams(&self, settings: &StreamersSettings) -> Option<LiveSnapshot> {
        match self.aggregate(settings).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Live status aggregation failed");
                None
            }
        }
    }

    async fn aggregate(&self, settings: &StreamersSettings) -> Result<Option<LiveSnapshot>> {
        if !settings.enabled {
            return Ok(None);
        }

        let sources = self.provider.fetch_sources(settings).await?;
        if sources.is_empty() {
            return Ok(None);
        }

        // Without a group there is no way to tell whose mount is whose
        let Some(group) = self.policy.authorizing_group(settings).await? else {
            debug!("No authorizing group, not reporting live streams");
            return Ok(None);
        };

        let member_ids = self.directory.member_ids(group.id).await?;
        if member_ids.is_empty() {
            return Ok(None);
        }

        let enabled = self.store.enabled_for_users(&member_ids).await?;
        if enabled.is_empty() {
            return Ok(None);
        }

        let owner_ids: Vec<UserId> = enabled.iter().map(|s| s.user_id).collect();
        let mut owners: HashMap<UserId, PlatformUser> = self
            .directory
            .users_by_ids(&owner_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        let mut by_mount: HashMap<String, (UserStreamSetting, PlatformUser)> = HashMap::new();
        for setting in enabled {
            let Some(user) = owners.remove(&setting.user_id) else {
                continue;
            };
            // Excluded users never show up, even before their setting is disabled
            if settings.is_excluded(&user.username) {
                continue;
            }
            by_mount.insert(setting.public_mount(), (setting, user));
        }

        let streams: Vec<LiveStreamView> = sources
            .iter()
            .filter_map(|source| {
                let mount = source.mount.as_deref().map(str::trim).filter(|m| !m.is_empty())?;
                let (setting, user) = by_mount.get(mount)?;
                Some(build_view(settings, source, mount, setting, user))
            })
            .collect();

        if streams.is_empty() {
            return Ok(None);
        }

        debug!(count = streams.len(), "Live streams aggregated");
        Ok(Some(LiveSnapshot {
            streams,
            updated_at: Utc::now(),
        }))
    }
}

fn build_view(
    settings: &StreamersSettings,
    source: &LiveSourceRecord,
    mount: &str,
    setting: &UserStreamSetting,
    user: &PlatformUser,
) -> LiveStreamView {
    LiveStreamView {
        user_id: user.id,
        username: user.username.clone(),
        name: user.display_name().to_string(),
        avatar_template: user.avatar_template.clone(),
        mount: mount.to_string(),
        listen_url: setting.public_listen_url(&settings.icecast_status_url),
        listeners: source.listeners,
        bitrate: source.bitrate,
        title: sanitize_text(source.raw_title()),
        stream_tag: sanitize_stream_tag(setting.stream_tag.as_deref()),
        stream_started_at: source
            .stream_start
            .as_deref()
            .map(sanitize_text)
            .filter(|s| !s.is_empty()),
    }
}
