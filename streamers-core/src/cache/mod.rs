pub mod key_builder;
pub mod live_status_cache;

pub use key_builder::KeyBuilder;
pub use live_status_cache::{LiveStatusCache, StatusPayload, StreamsPayload};
