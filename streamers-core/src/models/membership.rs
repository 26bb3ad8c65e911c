use serde::{Deserialize, Serialize};

use super::id::UserId;

/// What the membership rules want for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipDecision {
    Add,
    Remove,
    NoOp,
}

/// What an incremental reconciliation actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipOutcome {
    Added,
    Removed,
    Unchanged,
    /// Reconciliation did not run (feature off, auto-manage off, no group, unknown user)
    Skipped,
}

/// Result of a bulk sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn mutations(&self) -> usize {
        self.added + self.removed
    }
}

/// Events dispatched by the host platform into the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MembershipEvent {
    UserAddedToGroup { user_id: UserId, group: String },
    UserRemovedFromGroup { user_id: UserId, group: String },
    UserTrustLevelChanged { user_id: UserId },
    UserCreated { user_id: UserId },
    SettingChanged { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event: MembershipEvent = serde_json::from_str(
            r#"{"event":"user_added_to_group","user_id":3,"group":"streamers"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            MembershipEvent::UserAddedToGroup {
                user_id: UserId(3),
                group: "streamers".to_string()
            }
        );

        let event: MembershipEvent =
            serde_json::from_str(r#"{"event":"setting_changed","name":"min_trust_level"}"#).unwrap();
        assert!(matches!(event, MembershipEvent::SettingChanged { .. }));
    }
}
