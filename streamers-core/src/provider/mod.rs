//! Streaming server status providers

pub mod icecast;

use async_trait::async_trait;
use thiserror::Error;

use crate::{config::StreamersSettings, models::LiveSourceRecord};

pub use icecast::IcecastClient;

/// Upper bound on a status document
pub const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IcecastError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: reqwest::StatusCode, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: u64 },
}

impl From<reqwest::Error> for IcecastError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<IcecastError> for crate::Error {
    fn from(err: IcecastError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for IcecastError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Source of the currently broadcasting mounts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceStatusProvider: Send + Sync {
    /// Fetch every active source.
    ///
    /// An unconfigured provider returns an empty list.
    async fn fetch_sources(
        &self,
        settings: &StreamersSettings,
    ) -> Result<Vec<LiveSourceRecord>, IcecastError>;
}

/// Check HTTP response status before processing body
pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, IcecastError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(IcecastError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

/// Read a JSON body, refusing anything over [`MAX_RESPONSE_SIZE`]
pub async fn json_with_limit<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, IcecastError> {
    if let Some(length) = response.content_length() {
        if length > MAX_RESPONSE_SIZE as u64 {
            return Err(IcecastError::ResponseTooLarge { size: length });
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(IcecastError::ResponseTooLarge {
            size: bytes.len() as u64,
        });
    }
    serde_json::from_slice(&bytes).map_err(Into::into)
}
