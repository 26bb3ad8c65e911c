//! Source authentication
//!
//! Decides whether a broadcaster may start sending audio to a mount. The
//! streaming server calls in with the mount, a username and the raw stream
//! key; the answer is allow or deny with a reason.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. feature disabled (`disabled`)
//! 2. blank mount, user or key (`missing_params`)
//! 3. client tag present but not `source` (`unsupported_client`)
//! 4. no such user (`unknown_user`)
//! 5. excluded or not in the authorizing group (`not_allowed`)
//! 6. no enabled setting (`streaming_disabled`)
//! 7. key does not verify (`invalid_stream_key`)
//! 8. mount is not the user's mount (`wrong_mount`)

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{policy::StreamingPolicy, stream_key::verify_stream_key};
use crate::{
    config::StreamersSettings,
    models::{StreamSettingChanges, UserId},
    repository::{StreamSettingStore, UserDirectory},
    validation::normalize_mount,
    Result,
};

/// The only client tag the streaming server may send
pub const SOURCE_CLIENT: &str = "source";

/// An inbound "start broadcasting" request
#[derive(Clone, Default, Deserialize)]
pub struct SourceAuthRequest {
    pub mount: String,
    pub user: String,
    pub key: String,
    pub client: Option<String>,
    /// Address of the caller, for logging only
    pub remote: Option<String>,
    pub user_agent: Option<String>,
    /// Address of the source client as reported by the streaming server
    pub source_ip: Option<String>,
}

impl std::fmt::Debug for SourceAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAuthRequest")
            .field("mount", &self.mount)
            .field("user", &self.user)
            .field("key", &"[redacted]")
            .field("client", &self.client)
            .field("remote", &self.remote)
            .field("user_agent", &self.user_agent)
            .field("source_ip", &self.source_ip)
            .finish()
    }
}

/// Reason attached to a denied request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Disabled,
    MissingParams,
    UnsupportedClient,
    UnknownUser,
    NotAllowed,
    StreamingDisabled,
    InvalidStreamKey,
    WrongMount,
    /// A lookup failed; the request is denied rather than guessed
    LookupFailed,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::MissingParams => "missing_params",
            Self::UnsupportedClient => "unsupported_client",
            Self::UnknownUser => "unknown_user",
            Self::NotAllowed => "not_allowed",
            Self::StreamingDisabled => "streaming_disabled",
            Self::InvalidStreamKey => "invalid_stream_key",
            Self::WrongMount => "wrong_mount",
            Self::LookupFailed => "lookup_failed",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow { user_id: UserId, mount: String },
    Deny(DenyReason),
}

impl AuthDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny(reason) => Some(*reason),
        }
    }
}

/// Outcome of the ordered checks, with what is known for logging
enum Verdict {
    Allow(UserId),
    Deny {
        reason: DenyReason,
        user_id: Option<UserId>,
    },
}

impl Verdict {
    const fn deny(reason: DenyReason) -> Self {
        Self::Deny {
            reason,
            user_id: None,
        }
    }

    const fn deny_user(reason: DenyReason, user_id: UserId) -> Self {
        Self::Deny {
            reason,
            user_id: Some(user_id),
        }
    }
}

#[derive(Clone)]
pub struct SourceAuthService {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn StreamSettingStore>,
    policy: StreamingPolicy,
}

impl std::fmt::Debug for SourceAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAuthService").finish_non_exhaustive()
    }
}

impl SourceAuthService {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn StreamSettingStore>) -> Self {
        Self {
            policy: StreamingPolicy::new(directory.clone()),
            directory,
            store,
        }
    }

    /// Run the checks without side effects other than logging denials
    pub async fn decide(
        &self,
        settings: &StreamersSettings,
        request: &SourceAuthRequest,
    ) -> AuthDecision {
        let mount = normalize_mount(&request.mount);

        let verdict = match self.evaluate(settings, request, &mount).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, user = %request.user, "Source auth lookup failed");
                Verdict::deny(DenyReason::LookupFailed)
            }
        };

        match verdict {
            Verdict::Allow(user_id) => AuthDecision::Allow { user_id, mount },
            Verdict::Deny { reason, user_id } => {
                info!(
                    reason = %reason,
                    remote = request.remote.as_deref().unwrap_or_default(),
                    user_agent = request.user_agent.as_deref().unwrap_or_default(),
                    source_ip = request.source_ip.as_deref().unwrap_or_default(),
                    mount = %mount,
                    user = %request.user.trim(),
                    user_id = user_id.map(UserId::as_i64),
                    "Source auth denied"
                );
                AuthDecision::Deny(reason)
            }
        }
    }

    async fn evaluate(
        &self,
        settings: &StreamersSettings,
        request: &SourceAuthRequest,
        mount: &str,
    ) -> Result<Verdict> {
        if !settings.source_auth_active() {
            return Ok(Verdict::deny(DenyReason::Disabled));
        }

        let username = request.user.trim();
        if mount.is_empty() || username.is_empty() || request.key.trim().is_empty() {
            return Ok(Verdict::deny(DenyReason::MissingParams));
        }

        if let Some(client) = request.client.as_deref().filter(|c| !c.is_empty()) {
            if client != SOURCE_CLIENT {
                return Ok(Verdict::deny(DenyReason::UnsupportedClient));
            }
        }

        let Some(user) = self.directory.find_user_by_username(username).await? else {
            return Ok(Verdict::deny(DenyReason::UnknownUser));
        };

        if !self.policy.allowed_to_stream(settings, &user).await? {
            return Ok(Verdict::deny_user(DenyReason::NotAllowed, user.id));
        }

        let setting = match self.store.find_by_user(user.id).await? {
            Some(setting) if setting.enabled => setting,
            _ => return Ok(Verdict::deny_user(DenyReason::StreamingDisabled, user.id)),
        };

        if !verify_stream_key(&request.key, setting.stream_key_digest.as_deref()) {
            return Ok(Verdict::deny_user(DenyReason::InvalidStreamKey, user.id));
        }

        if mount != setting.public_mount() {
            return Ok(Verdict::deny_user(DenyReason::WrongMount, user.id));
        }

        Ok(Verdict::Allow(user.id))
    }

    /// Record that the user's stream started now
    pub async fn mark_stream_started(&self, user_id: UserId) -> Result<()> {
        self.store
            .update(user_id, StreamSettingChanges::stream_started(Utc::now()))
            .await?;
        Ok(())
    }

    /// Decide, then stamp `last_stream_started_at` on allow.
    ///
    /// A failed stamp is logged and does not change the decision.
    pub async fn authenticate(
        &self,
        settings: &StreamersSettings,
        request: &SourceAuthRequest,
    ) -> AuthDecision {
        let decision = self.decide(settings, request).await;

        if let AuthDecision::Allow { user_id, mount } = &decision {
            if let Err(e) = self.mark_stream_started(*user_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to mark stream started");
            }
            info!(user_id = %user_id, mount = %mount, "Source auth allowed");
        }

        decision
    }
}
