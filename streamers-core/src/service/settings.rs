//! Runtime settings snapshot
//!
//! Services never read settings from global state; callers take a snapshot
//! from the handle and pass it in. A reload swaps the snapshot atomically.

use std::sync::Arc;

use parking_lot::RwLock;

use super::membership::settings_affect_group_membership;
use crate::{config::StreamersSettings, models::MembershipEvent};

/// Fields that differ between the old and new snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub changed: Vec<&'static str>,
}

impl SettingsChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// A single `SettingChanged` event if any membership field changed.
    ///
    /// Each such event triggers a full sweep, so several changed fields
    /// still produce only one.
    #[must_use]
    pub fn membership_event(&self) -> Option<MembershipEvent> {
        self.changed
            .iter()
            .find(|name| settings_affect_group_membership(name))
            .map(|name| MembershipEvent::SettingChanged {
                name: (*name).to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<StreamersSettings>>>,
}

impl SettingsHandle {
    #[must_use]
    pub fn new(settings: StreamersSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<StreamersSettings> {
        self.inner.read().clone()
    }

    /// Swap in a new snapshot and report what changed
    pub fn replace(&self, settings: StreamersSettings) -> SettingsChange {
        let mut guard = self.inner.write();
        let changed = guard.changed_fields(&settings);
        *guard = Arc::new(settings);
        SettingsChange { changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_reports_membership_changes() {
        let handle = SettingsHandle::new(StreamersSettings::default());
        let before = handle.current();

        let change = handle.replace(StreamersSettings {
            min_trust_level: 4,
            force_exclude: vec!["mallory".to_string()],
            status_cache_seconds: 60,
            ..StreamersSettings::default()
        });

        assert_eq!(
            change.changed,
            vec!["min_trust_level", "force_exclude", "status_cache_seconds"]
        );
        assert_eq!(
            change.membership_event(),
            Some(MembershipEvent::SettingChanged {
                name: "min_trust_level".to_string()
            })
        );
        // Earlier snapshots are unaffected
        assert_eq!(before.min_trust_level, 2);
        assert_eq!(handle.current().min_trust_level, 4);
    }

    #[test]
    fn test_non_membership_change_queues_nothing() {
        let handle = SettingsHandle::new(StreamersSettings::default());
        let change = handle.replace(StreamersSettings {
            status_cache_seconds: 60,
            ..StreamersSettings::default()
        });
        assert!(!change.is_empty());
        assert_eq!(change.membership_event(), None);
    }

    #[test]
    fn test_identical_replace_is_empty() {
        let handle = SettingsHandle::new(StreamersSettings::default());
        assert!(handle.replace(StreamersSettings::default()).is_empty());
    }
}
