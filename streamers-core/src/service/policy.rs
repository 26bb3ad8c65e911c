//! Who may stream
//!
//! A user may stream when the feature is on, they are not force-excluded and
//! they belong to the authorizing group. Both the source auth gate and the
//! self-service endpoints ask this question.

use std::sync::Arc;

use crate::{
    config::StreamersSettings,
    models::{Group, PlatformUser},
    repository::UserDirectory,
    Result,
};

/// Why a user is or is not allowed to stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Allowed(Group),
    FeatureDisabled,
    Excluded,
    /// No group configured, or the configured group does not exist
    NoGroup,
    NotMember,
}

impl Eligibility {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

#[derive(Clone)]
pub struct StreamingPolicy {
    directory: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for StreamingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPolicy").finish_non_exhaustive()
    }
}

impl StreamingPolicy {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the authorizing group, `None` when unconfigured or missing
    pub async fn authorizing_group(&self, settings: &StreamersSettings) -> Result<Option<Group>> {
        let name = settings.normalized_group_name();
        if name.is_empty() {
            return Ok(None);
        }
        self.directory.find_group_by_name(&name).await
    }

    /// Evaluate the streaming rules for a user.
    ///
    /// The exclusion list is checked before any directory lookup.
    pub async fn eligibility(
        &self,
        settings: &StreamersSettings,
        user: &PlatformUser,
    ) -> Result<Eligibility> {
        if !settings.enabled {
            return Ok(Eligibility::FeatureDisabled);
        }
        if settings.is_excluded(&user.username) {
            return Ok(Eligibility::Excluded);
        }
        let Some(group) = self.authorizing_group(settings).await? else {
            return Ok(Eligibility::NoGroup);
        };
        if !self.directory.is_member(group.id, user.id).await? {
            return Ok(Eligibility::NotMember);
        }
        Ok(Eligibility::Allowed(group))
    }

    pub async fn allowed_to_stream(
        &self,
        settings: &StreamersSettings,
        user: &PlatformUser,
    ) -> Result<bool> {
        Ok(self.eligibility(settings, user).await?.is_allowed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{fixture, settings, user, STREAMERS_GROUP};
    use crate::models::{GroupId, UserId};

    #[tokio::test]
    async fn test_eligibility_rules() {
        let (_, directory) = fixture();
        let policy = StreamingPolicy::new(directory.clone());
        let alice = user(1, "alice", 3);
        let settings = settings();

        assert_eq!(
            policy.eligibility(&settings, &alice).await.unwrap(),
            Eligibility::NotMember
        );

        directory.seed_member(GroupId(STREAMERS_GROUP), UserId(1));
        assert!(policy.allowed_to_stream(&settings, &alice).await.unwrap());

        let excluded = StreamersSettings {
            force_exclude: vec!["alice".to_string()],
            ..settings.clone()
        };
        assert_eq!(
            policy.eligibility(&excluded, &alice).await.unwrap(),
            Eligibility::Excluded
        );

        let no_group = StreamersSettings {
            group_name: "  ".to_string(),
            ..settings.clone()
        };
        assert_eq!(
            policy.eligibility(&no_group, &alice).await.unwrap(),
            Eligibility::NoGroup
        );

        let disabled = StreamersSettings {
            enabled: false,
            ..settings
        };
        assert!(!policy.allowed_to_stream(&disabled, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_group_name_is_case_insensitive() {
        let (_, directory) = fixture();
        directory.seed_member(GroupId(STREAMERS_GROUP), UserId(1));
        let policy = StreamingPolicy::new(directory);

        let settings = StreamersSettings {
            group_name: " Streamers ".to_string(),
            ..settings()
        };
        assert!(policy
            .allowed_to_stream(&settings, &user(1, "alice", 0))
            .await
            .unwrap());
    }
}
