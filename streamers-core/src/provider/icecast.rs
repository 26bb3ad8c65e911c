//! Icecast `status-json.xsl` client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{check_response, json_with_limit, IcecastError, SourceStatusProvider};
use crate::{config::StreamersSettings, models::LiveSourceRecord};

/// Icecast status client
///
/// Redirects are not followed, so a status URL cannot be bounced to an
/// internal address.
#[derive(Debug, Clone)]
pub struct IcecastClient {
    client: Client,
}

impl IcecastClient {
    pub fn new() -> Result<Self, IcecastError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(2)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| IcecastError::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceStatusProvider for IcecastClient {
    async fn fetch_sources(
        &self,
        settings: &StreamersSettings,
    ) -> Result<Vec<LiveSourceRecord>, IcecastError> {
        let status_url = settings.icecast_status_url.trim();
        if status_url.is_empty() {
            return Ok(Vec::new());
        }
        let url = Url::parse(status_url)
            .map_err(|e| IcecastError::InvalidConfig(format!("status url: {e}")))?;

        let mut request = self
            .client
            .get(url)
            .timeout(Duration::from_secs(settings.icecast_timeout_seconds.max(1)));

        let user = settings.icecast_basic_auth_user.trim();
        let password = &settings.icecast_basic_auth_password;
        if !user.is_empty() && !password.is_empty() {
            request = request.basic_auth(user, Some(password));
        }

        let response = check_response(request.send().await?)?;
        let body: Value = json_with_limit(response).await?;
        let sources = parse_status(&body);

        debug!(count = sources.len(), "Fetched Icecast sources");
        Ok(sources)
    }
}

/// Extract the sources of a status document.
///
/// Icecast reports a single source as an object and several as an array;
/// with nothing live the field is missing.
#[must_use]
pub fn parse_status(body: &Value) -> Vec<LiveSourceRecord> {
    let raw = body.get("icestats").and_then(|stats| stats.get("source"));
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(parse_source).collect(),
        Some(source @ Value::Object(_)) => parse_source(source).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_source(source: &Value) -> Option<LiveSourceRecord> {
    let source = source.as_object()?;
    let field = |name: &str| source.get(name).and_then(text);

    let listen_url = field("listenurl").unwrap_or_default();
    let mount = Url::parse(&listen_url)
        .ok()
        .map(|url| url.path().to_string());

    Some(LiveSourceRecord {
        mount,
        listen_url,
        title: field("title"),
        server_name: field("server_name"),
        listeners: source.get("listeners").map_or(0, integer),
        bitrate: source.get("bitrate").map_or(0, integer),
        stream_start: field("stream_start_iso8601")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| field("stream_start")),
    })
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers, or the leading integer of a string (`"128kbps"` is 128); else 0
fn integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => {
            let s = s.trim();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            digits[..end].parse::<i64>().map_or(0, |n| sign * n)
        }
        _ => 0,
    }
}
