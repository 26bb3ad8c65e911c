// Streamers API Library
//
// HTTP surface for the streaming server, the host platform and end users

pub mod http;

pub use http::{create_router, AppState};
