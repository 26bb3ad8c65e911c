//! Short-lived memo in front of the live status aggregation
//!
//! Each payload is cached under its own instance-scoped key with its own TTL,
//! read from the settings snapshot at fill time. Concurrent misses on the same
//! key share one aggregation. A TTL of zero or less disables caching.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::SecondsFormat;
use moka::{future::Cache, Expiry};
use serde::{Deserialize, Serialize};

use super::KeyBuilder;
use crate::{
    config::StreamersSettings,
    models::{LiveSnapshot, LiveStreamView},
    service::LiveStatusService,
};

/// Body of the live streams listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamsPayload {
    pub live_streams: Option<Vec<LiveStreamView>>,
    pub updated_at: Option<String>,
}

impl From<Option<LiveSnapshot>> for StreamsPayload {
    fn from(snapshot: Option<LiveSnapshot>) -> Self {
        match snapshot {
            Some(snapshot) => Self {
                updated_at: Some(snapshot.updated_at.to_rfc3339_opts(SecondsFormat::Secs, false)),
                live_streams: Some(snapshot.streams),
            },
            None => Self::default(),
        }
    }
}

/// Body of the lightweight "anyone live?" endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub live: bool,
    pub count: usize,
    pub updated_at: Option<String>,
}

impl From<&StreamsPayload> for StatusPayload {
    fn from(payload: &StreamsPayload) -> Self {
        let count = payload.live_streams.as_ref().map_or(0, Vec::len);
        Self {
            live: count > 0,
            count,
            updated_at: payload.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Timed<T> {
    value: T,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with
struct TtlExpiry;

impl<T> Expiry<String, Timed<T>> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Timed<T>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

fn ttl_from_seconds(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

fn build_cache<T: Clone + Send + Sync + 'static>() -> Cache<String, Timed<T>> {
    Cache::builder()
        .max_capacity(LiveStatusCache::MAX_ENTRIES)
        .expire_after(TtlExpiry)
        .build()
}

#[derive(Clone)]
pub struct LiveStatusCache {
    aggregator: LiveStatusService,
    keys: KeyBuilder,
    streams: Arc<Cache<String, Timed<StreamsPayload>>>,
    status: Arc<Cache<String, Timed<StatusPayload>>>,
}

impl std::fmt::Debug for LiveStatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStatusCache")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl LiveStatusCache {
    /// One key per payload per instance; a little headroom is plenty
    pub const MAX_ENTRIES: u64 = 16;

    #[must_use]
    pub fn new(aggregator: LiveStatusService, keys: KeyBuilder) -> Self {
        Self {
            aggregator,
            keys,
            streams: Arc::new(build_cache()),
            status: Arc::new(build_cache()),
        }
    }

    async fn compute_streams(&self, settings: &StreamersSettings) -> StreamsPayload {
        self.aggregator.live_streams(settings).await.into()
    }

    pub async fn streams_payload(&self, settings: &StreamersSettings) -> StreamsPayload {
        let Some(ttl) = ttl_from_seconds(settings.streams_cache_seconds) else {
            return self.compute_streams(settings).await;
        };

        self.streams
            .get_with(self.keys.streams_payload(), async {
                Timed {
                    value: self.compute_streams(settings).await,
                    ttl,
                }
            })
            .await
            .value
    }

    /// Derived from the streams payload, so it goes through that cache too
    pub async fn status_payload(&self, settings: &StreamersSettings) -> StatusPayload {
        let Some(ttl) = ttl_from_seconds(settings.status_cache_seconds) else {
            return StatusPayload::from(&self.streams_payload(settings).await);
        };

        self.status
            .get_with(self.keys.status_payload(), async {
                Timed {
                    value: StatusPayload::from(&self.streams_payload(settings).await),
                    ttl,
                }
            })
            .await
            .value
    }

    /// Drop every cached payload, e.g. after a settings reload
    pub fn invalidate_all(&self) {
        self.streams.invalidate_all();
        self.status.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{GroupId, LiveSourceRecord, NewStreamSetting, UserId},
        provider::MockSourceStatusProvider,
        repository::StreamSettingStore,
        test_helpers::{fixture, settings, user, STREAMERS_GROUP},
    };

    /// alice (id 1) is live on /u/1; the provider expects `calls` fetches
    async fn cache_expecting(calls: usize) -> LiveStatusCache {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 3));
        directory.seed_member(GroupId(STREAMERS_GROUP), UserId(1));
        store
            .find_or_create(UserId(1), NewStreamSetting::for_user(UserId(1)))
            .await
            .unwrap();

        let mut provider = MockSourceStatusProvider::new();
        provider.expect_fetch_sources().times(calls).returning(|_| {
            Ok(vec![LiveSourceRecord {
                mount: Some("/u/1".to_string()),
                listen_url: "http://radio.example.com/u/1".to_string(),
                title: Some("Morning show".to_string()),
                ..LiveSourceRecord::default()
            }])
        });

        let aggregator = LiveStatusService::new(directory, store, Arc::new(provider));
        LiveStatusCache::new(aggregator, KeyBuilder::default())
    }

    #[tokio::test]
    async fn test_payload_is_cached_within_ttl() {
        let cache = cache_expecting(1).await;
        let settings = StreamersSettings {
            streams_cache_seconds: 60,
            status_cache_seconds: 60,
            ..settings()
        };

        let first = cache.streams_payload(&settings).await;
        let second = cache.streams_payload(&settings).await;
        let status = cache.status_payload(&settings).await;

        assert_eq!(first, second);
        assert_eq!(first.live_streams.as_ref().map(Vec::len), Some(1));
        assert!(first.updated_at.is_some());
        assert_eq!(
            status,
            StatusPayload {
                live: true,
                count: 1,
                updated_at: first.updated_at.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_non_positive_ttl_bypasses_cache() {
        let cache = cache_expecting(3).await;
        let settings = StreamersSettings {
            streams_cache_seconds: 0,
            status_cache_seconds: -5,
            ..settings()
        };

        cache.streams_payload(&settings).await;
        cache.streams_payload(&settings).await;
        cache.status_payload(&settings).await;
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = cache_expecting(2).await;
        let settings = StreamersSettings {
            streams_cache_seconds: 60,
            ..settings()
        };

        cache.streams_payload(&settings).await;
        cache.invalidate_all();
        cache.streams_payload(&settings).await;
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = cache_expecting(1).await;
        let settings = StreamersSettings {
            streams_cache_seconds: 60,
            ..settings()
        };

        let (a, b) = tokio::join!(
            cache.streams_payload(&settings),
            cache.streams_payload(&settings)
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_snapshot_payloads() {
        let payload = StreamsPayload::from(None);
        assert_eq!(payload.live_streams, None);
        assert_eq!(payload.updated_at, None);

        let status = StatusPayload::from(&payload);
        assert!(!status.live);
        assert_eq!(status.count, 0);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["live_streams"].is_null());
        assert!(json["updated_at"].is_null());
    }
}
