//! Stream key lifecycle
//!
//! A stream key is 32 random bytes, hex encoded. Only its SHA-256 digest is
//! persisted; the raw value leaves this module exactly once, as the return
//! value of [`StreamKeyService::rotate`].

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::{
    models::{StreamSettingChanges, UserId},
    repository::StreamSettingStore,
    Error, Result,
};

/// Entropy of a generated stream key in bytes
pub const STREAM_KEY_BYTES: usize = 32;
/// Entropy of the legacy filler value stored alongside the digest
const LEGACY_FILLER_BYTES: usize = 16;

/// A plaintext stream key.
///
/// `Debug` never prints the value, so the key cannot end up in logs by
/// accident.
#[derive(Clone, PartialEq, Eq)]
pub struct RawStreamKey(String);

impl RawStreamKey {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for RawStreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawStreamKey([redacted])")
    }
}

/// A freshly generated key and its digest
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub raw: RawStreamKey,
    pub digest: String,
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a new stream key and its digest
#[must_use]
pub fn generate_stream_key() -> GeneratedKey {
    let raw = random_hex(STREAM_KEY_BYTES);
    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    GeneratedKey {
        raw: RawStreamKey(raw),
        digest,
    }
}

/// Lowercase hex SHA-256 of a raw key, `None` for blank input
#[must_use]
pub fn digest_stream_key(raw_key: impl AsRef<[u8]>) -> Option<String> {
    let raw_key = raw_key.as_ref();
    if raw_key.trim_ascii().is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(raw_key)))
}

/// Check a raw key against a stored digest in constant time.
///
/// Blank keys and missing digests never verify.
#[must_use]
pub fn verify_stream_key(raw_key: impl AsRef<[u8]>, digest: Option<&str>) -> bool {
    let Some(stored) = digest.map(str::trim).filter(|d| !d.is_empty()) else {
        return false;
    };
    let Some(computed) = digest_stream_key(raw_key) else {
        return false;
    };

    computed
        .as_bytes()
        .ct_eq(stored.to_ascii_lowercase().as_bytes())
        .into()
}

/// Random value for the legacy plaintext key column.
///
/// The column is `NOT NULL UNIQUE` in older schemas; it is never read back.
#[must_use]
pub fn legacy_filler_key() -> String {
    random_hex(LEGACY_FILLER_BYTES)
}

/// Stream key operations against the settings store
#[derive(Clone)]
pub struct StreamKeyService {
    store: Arc<dyn StreamSettingStore>,
}

impl std::fmt::Debug for StreamKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKeyService").finish_non_exhaustive()
    }
}

impl StreamKeyService {
    #[must_use]
    pub fn new(store: Arc<dyn StreamSettingStore>) -> Self {
        Self { store }
    }

    /// Replace the user's digest and return the new raw key.
    ///
    /// The setting must already exist. The digest is written in a single
    /// store update, so a failed write leaves the previous key valid.
    pub async fn rotate(&self, user_id: UserId) -> Result<RawStreamKey> {
        let generated = generate_stream_key();
        self.store
            .update(user_id, StreamSettingChanges::digest(Some(generated.digest)))
            .await?;

        info!(user_id = %user_id, "Stream key rotated");
        Ok(generated.raw)
    }

    /// Remove the user's digest; every later auth attempt fails
    pub async fn clear(&self, user_id: UserId) -> Result<()> {
        self.store
            .update(user_id, StreamSettingChanges::digest(None))
            .await?;

        info!(user_id = %user_id, "Stream key cleared");
        Ok(())
    }

    pub async fn has_key(&self, user_id: UserId) -> Result<bool> {
        let setting = self
            .store
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("stream setting for user {user_id}")))?;
        Ok(setting.has_stream_key())
    }

    /// Verify a raw key against the user's stored digest
    pub async fn verify(&self, user_id: UserId, raw_key: &str) -> Result<bool> {
        let setting = self.store.find_by_user(user_id).await?;
        Ok(setting.is_some_and(|s| verify_stream_key(raw_key, s.stream_key_digest.as_deref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::NewStreamSetting,
        repository::MemoryStreamSettingStore,
    };

    #[test]
    fn test_generated_key_shape() {
        let key = generate_stream_key();

        assert_eq!(key.raw.expose().len(), STREAM_KEY_BYTES * 2);
        assert!(key.raw.expose().bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(key.digest.len(), 64);
        assert_ne!(key.raw.expose(), generate_stream_key().raw.expose());
        assert!(!format!("{:?}", key.raw).contains(key.raw.expose()));
    }

    #[test]
    fn test_verify_accepts_own_digest() {
        let key = generate_stream_key();
        assert!(verify_stream_key(key.raw.expose(), Some(&key.digest)));
        assert!(verify_stream_key(
            key.raw.expose(),
            Some(&key.digest.to_uppercase())
        ));
    }

    #[test]
    fn test_verify_rejects_every_single_bit_flip() {
        let key = generate_stream_key();
        let raw = key.raw.expose().as_bytes().to_vec();

        for index in 0..raw.len() {
            for bit in 0..8 {
                let mut mutated = raw.clone();
                mutated[index] ^= 1 << bit;
                assert!(
                    !verify_stream_key(&mutated, Some(&key.digest)),
                    "flip of bit {bit} at {index} verified"
                );
            }
        }
    }

    #[test]
    fn test_verify_degrades_to_false() {
        let key = generate_stream_key();

        assert!(!verify_stream_key("", Some(&key.digest)));
        assert!(!verify_stream_key("   ", Some(&key.digest)));
        assert!(!verify_stream_key(key.raw.expose(), None));
        assert!(!verify_stream_key(key.raw.expose(), Some("")));
        assert!(!verify_stream_key(key.raw.expose(), Some("not-a-digest")));
        assert_eq!(digest_stream_key(" "), None);
    }

    #[test]
    fn test_legacy_filler_key() {
        let filler = legacy_filler_key();
        assert_eq!(filler.len(), 32);
        assert_ne!(filler, legacy_filler_key());
    }

    #[tokio::test]
    async fn test_rotate_invalidates_previous_key() {
        let store = Arc::new(MemoryStreamSettingStore::new());
        store
            .find_or_create(UserId(1), NewStreamSetting::for_user(UserId(1)))
            .await
            .unwrap();
        let service = StreamKeyService::new(store.clone());

        assert!(!service.has_key(UserId(1)).await.unwrap());

        let first = service.rotate(UserId(1)).await.unwrap();
        assert!(service.verify(UserId(1), first.expose()).await.unwrap());

        let second = service.rotate(UserId(1)).await.unwrap();
        assert!(service.verify(UserId(1), second.expose()).await.unwrap());
        assert!(!service.verify(UserId(1), first.expose()).await.unwrap());

        let stored = store.find_by_user(UserId(1)).await.unwrap().unwrap();
        assert!(verify_stream_key(second.expose(), stored.stream_key_digest.as_deref()));
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_previous_key() {
        let store = Arc::new(MemoryStreamSettingStore::new());
        store
            .find_or_create(UserId(1), NewStreamSetting::for_user(UserId(1)))
            .await
            .unwrap();
        let service = StreamKeyService::new(store.clone());
        let key = service.rotate(UserId(1)).await.unwrap();

        store.fail_next_updates(1);
        assert!(service.rotate(UserId(1)).await.is_err());
        assert!(service.verify(UserId(1), key.expose()).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_key() {
        let store = Arc::new(MemoryStreamSettingStore::new());
        store
            .find_or_create(UserId(1), NewStreamSetting::for_user(UserId(1)))
            .await
            .unwrap();
        let service = StreamKeyService::new(store.clone());

        let key = service.rotate(UserId(1)).await.unwrap();
        assert!(service.has_key(UserId(1)).await.unwrap());

        service.clear(UserId(1)).await.unwrap();
        assert!(!service.has_key(UserId(1)).await.unwrap());
        assert!(!service.verify(UserId(1), key.expose()).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_without_setting_is_not_found() {
        let service = StreamKeyService::new(Arc::new(MemoryStreamSettingStore::new()));
        let err = service.rotate(UserId(5)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
