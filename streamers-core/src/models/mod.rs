pub mod id;
pub mod live;
pub mod membership;
pub mod stream_setting;
pub mod user;

pub use id::{GroupId, UserId};
pub use live::{LiveSnapshot, LiveSourceRecord, LiveStreamView};
pub use membership::{MembershipDecision, MembershipEvent, MembershipOutcome, SweepReport};
pub use stream_setting::{NewStreamSetting, StreamSettingChanges, UserStreamSetting};
pub use user::{Group, PlatformUser};
