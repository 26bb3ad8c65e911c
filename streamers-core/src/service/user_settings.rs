//! Self-service stream settings

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{
    policy::StreamingPolicy,
    stream_key::{RawStreamKey, StreamKeyService},
};
use crate::{
    config::StreamersSettings,
    models::{NewStreamSetting, PlatformUser, StreamSettingChanges, UserId, UserStreamSetting},
    repository::{StreamSettingStore, UserDirectory},
    validation::{default_mount_owner, MountValidator, StreamTagValidator, ValidationError},
    Error, Result,
};

/// What a user sees about their own streaming setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StreamSettingsView {
    NotAllowed {
        allowed: bool,
        user_id: UserId,
        username: String,
    },
    Allowed(Box<AllowedSettingsView>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedSettingsView {
    pub allowed: bool,
    pub user_id: UserId,
    pub username: String,
    pub name: Option<String>,
    pub mount: String,
    pub enabled: bool,
    pub has_stream_key: bool,
    pub public_listen_url: Option<String>,
    pub last_stream_started_at: Option<DateTime<Utc>>,
    pub stream_tag: Option<String>,
    pub stream_tag_options: Vec<String>,
}

impl StreamSettingsView {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

#[derive(Clone)]
pub struct UserSettingsService {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn StreamSettingStore>,
    keys: StreamKeyService,
    policy: StreamingPolicy,
}

impl std::fmt::Debug for UserSettingsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSettingsService").finish_non_exhaustive()
    }
}

impl UserSettingsService {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn StreamSettingStore>) -> Self {
        Self {
            policy: StreamingPolicy::new(directory.clone()),
            keys: StreamKeyService::new(store.clone()),
            directory,
            store,
        }
    }

    async fn load_user(&self, user_id: UserId) -> Result<PlatformUser> {
        self.directory
            .find_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))
    }

    async fn require_allowed(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
    ) -> Result<PlatformUser> {
        let user = self.load_user(user_id).await?;
        if !self.policy.allowed_to_stream(settings, &user).await? {
            return Err(Error::Authorization("not allowed to stream".to_string()));
        }
        Ok(user)
    }

    /// Lazily create the setting, re-enabling a disabled one
    async fn ensure_setting(&self, user_id: UserId) -> Result<UserStreamSetting> {
        let setting = self
            .store
            .find_or_create(user_id, NewStreamSetting::for_user(user_id))
            .await?;
        if setting.enabled {
            return Ok(setting);
        }
        self.store
            .update(user_id, StreamSettingChanges::enabled(true))
            .await
    }

    pub async fn show(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
    ) -> Result<StreamSettingsView> {
        let user = self.load_user(user_id).await?;
        if !self.policy.allowed_to_stream(settings, &user).await? {
            return Ok(StreamSettingsView::NotAllowed {
                allowed: false,
                user_id: user.id,
                username: user.username,
            });
        }

        let setting = self.ensure_setting(user.id).await?;
        Ok(StreamSettingsView::Allowed(Box::new(AllowedSettingsView {
            allowed: true,
            user_id: user.id,
            name: user.name.clone(),
            username: user.username,
            mount: setting.public_mount(),
            enabled: setting.enabled,
            has_stream_key: setting.has_stream_key(),
            public_listen_url: setting.public_listen_url(&settings.icecast_status_url),
            last_stream_started_at: setting.last_stream_started_at,
            stream_tag: setting.stream_tag,
            stream_tag_options: settings.stream_tag_options.clone(),
        })))
    }

    /// Issue a new key. The raw value is returned once and never stored.
    pub async fn rotate_key(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
    ) -> Result<RawStreamKey> {
        let user = self.require_allowed(settings, user_id).await?;
        self.ensure_setting(user.id).await?;
        self.keys.rotate(user.id).await
    }

    /// Set or clear the user's tag; returns the stored value
    pub async fn update_stream_tag(
        &self,
        settings: &StreamersSettings,
        user_id: UserId,
        tag: Option<&str>,
    ) -> Result<Option<String>> {
        let user = self.require_allowed(settings, user_id).await?;
        let tag = StreamTagValidator::new(&settings.stream_tag_options).validate(tag)?;

        self.ensure_setting(user.id).await?;
        let setting = self
            .store
            .update(user.id, StreamSettingChanges::stream_tag(tag))
            .await?;
        Ok(setting.stream_tag)
    }

    /// Administratively revoke a user's key.
    ///
    /// Every later source connection for the user is denied until they
    /// rotate a new one. A user without a setting is `NotFound`.
    pub async fn revoke_key(&self, user_id: UserId) -> Result<()> {
        let user = self.load_user(user_id).await?;
        if self.keys.has_key(user.id).await? {
            self.keys.clear(user.id).await?;
        }
        Ok(())
    }

    /// Administratively assign a mount.
    ///
    /// A mount owned by someone else is rejected, never taken over. Another
    /// user's default mount counts as owned even before their setting exists.
    pub async fn assign_mount(&self, user_id: UserId, mount: &str) -> Result<UserStreamSetting> {
        let user = self.load_user(user_id).await?;
        let mount = MountValidator::new().validate(mount)?;

        if default_mount_owner(&mount).is_some_and(|owner| owner != user.id) {
            return Err(ValidationError::MountTaken.into());
        }
        if self.store.mount_taken(&mount, Some(user.id)).await? {
            return Err(ValidationError::MountTaken.into());
        }

        self.store
            .find_or_create(user.id, NewStreamSetting::for_user(user.id))
            .await?;
        let setting = self
            .store
            .update(user.id, StreamSettingChanges::mount(mount))
            .await?;

        info!(user_id = %user.id, mount = %setting.mount, "Mount assigned");
        Ok(setting)
    }
}
