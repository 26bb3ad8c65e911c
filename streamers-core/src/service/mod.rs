pub mod events;
pub mod live_status;
pub mod membership;
pub mod policy;
pub mod settings;
pub mod source_auth;
pub mod stream_key;
pub mod user_settings;

pub use events::{EventDispatcher, SweepScheduler};
pub use live_status::{LiveStatusService, SourceStatusProvider};
pub use membership::MembershipService;
pub use policy::StreamingPolicy;
pub use settings::SettingsHandle;
pub use source_auth::{AuthDecision, DenyReason, SourceAuthRequest, SourceAuthService};
pub use stream_key::{RawStreamKey, StreamKeyService};
pub use user_settings::{StreamSettingsView, UserSettingsService};
