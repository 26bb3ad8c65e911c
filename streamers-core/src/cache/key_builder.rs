//! Cache key builder
//!
//! Keys are scoped by deployment instance so several instances can share one
//! cache backend without reading each other's payloads. Payload keys carry a
//! version suffix; bump it when the payload shape changes.

use crate::Config;

/// Prefix of every key this service writes
pub const DEFAULT_PREFIX: &str = "streamers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
    instance: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            instance: instance.into(),
        }
    }

    /// Keys for the configured instance
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(DEFAULT_PREFIX, config.server.instance_name.trim())
    }

    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Full live streams payload
    #[must_use]
    pub fn streams_payload(&self) -> String {
        format!("{}:{}:streams_payload:v1", self.prefix, self.instance)
    }

    /// Live/count status payload
    #[must_use]
    pub fn status_payload(&self) -> String {
        format!("{}:{}:status_payload:v1", self.prefix, self.instance)
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, "default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_instance_scoped() {
        let keys = KeyBuilder::new("streamers", "eu-1");
        assert_eq!(keys.streams_payload(), "streamers:eu-1:streams_payload:v1");
        assert_eq!(keys.status_payload(), "streamers:eu-1:status_payload:v1");
        assert_ne!(
            keys.streams_payload(),
            KeyBuilder::default().streams_payload()
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.server.instance_name = " radio ".to_string();
        assert_eq!(KeyBuilder::from_config(&config).instance(), "radio");
    }
}
