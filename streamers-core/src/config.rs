use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub sweep: SweepConfig,
    pub streamers: StreamersSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Deployment instance name, scopes cache keys
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            instance_name: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty selects the in-memory store
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Secrets shared with the host platform
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for end-user bearer tokens issued by the host
    pub jwt_secret: String,
    /// Bearer secret the host presents on event and admin calls
    pub webhook_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &redacted(&self.jwt_secret))
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_seconds: u64,
    /// Page size of the eligible-population scan
    pub batch_size: u32,
    pub run_on_startup: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            batch_size: 500,
            run_on_startup: true,
        }
    }
}

/// Streaming policy settings
///
/// Passed explicitly into every service call; nothing in the core reads
/// these from global state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamersSettings {
    pub enabled: bool,
    pub source_auth_enabled: bool,
    pub group_name: String,
    pub min_trust_level: i32,
    pub auto_manage_group: bool,
    /// Usernames never allowed to stream, stored trimmed and lowercased
    #[serde(deserialize_with = "deserialize_username_list")]
    pub force_exclude: Vec<String>,
    pub icecast_status_url: String,
    pub icecast_basic_auth_user: String,
    pub icecast_basic_auth_password: String,
    pub icecast_timeout_seconds: u64,
    #[serde(deserialize_with = "deserialize_pipe_list")]
    pub stream_tag_options: Vec<String>,
    pub streams_cache_seconds: i64,
    pub status_cache_seconds: i64,
    pub streams_page_requires_login: bool,
}

impl Default for StreamersSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            source_auth_enabled: true,
            group_name: "streamers".to_string(),
            min_trust_level: 2,
            auto_manage_group: false,
            force_exclude: Vec::new(),
            icecast_status_url: String::new(),
            icecast_basic_auth_user: String::new(),
            icecast_basic_auth_password: String::new(),
            icecast_timeout_seconds: 5,
            stream_tag_options: Vec::new(),
            streams_cache_seconds: 15,
            status_cache_seconds: 15,
            streams_page_requires_login: false,
        }
    }
}

impl std::fmt::Debug for StreamersSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamersSettings")
            .field("enabled", &self.enabled)
            .field("source_auth_enabled", &self.source_auth_enabled)
            .field("group_name", &self.group_name)
            .field("min_trust_level", &self.min_trust_level)
            .field("auto_manage_group", &self.auto_manage_group)
            .field("force_exclude", &self.force_exclude)
            .field("icecast_status_url", &self.icecast_status_url)
            .field("icecast_basic_auth_user", &self.icecast_basic_auth_user)
            .field(
                "icecast_basic_auth_password",
                &redacted(&self.icecast_basic_auth_password),
            )
            .field("icecast_timeout_seconds", &self.icecast_timeout_seconds)
            .field("stream_tag_options", &self.stream_tag_options)
            .field("streams_cache_seconds", &self.streams_cache_seconds)
            .field("status_cache_seconds", &self.status_cache_seconds)
            .field("streams_page_requires_login", &self.streams_page_requires_login)
            .finish()
    }
}

impl StreamersSettings {
    /// Names of the settings whose change invalidates group membership
    pub const MEMBERSHIP_FIELDS: [&'static str; 4] = [
        "auto_manage_group",
        "min_trust_level",
        "group_name",
        "force_exclude",
    ];

    /// Normalised authorizing group name (trimmed, lowercased)
    #[must_use]
    pub fn normalized_group_name(&self) -> String {
        self.group_name.trim().to_lowercase()
    }

    /// Whether a username is on the force-exclude list
    #[must_use]
    pub fn is_excluded(&self, username: &str) -> bool {
        let username = username.trim().to_lowercase();
        !username.is_empty() && self.force_exclude.iter().any(|u| *u == username)
    }

    /// Whether the source auth endpoint is switched on
    #[must_use]
    pub const fn source_auth_active(&self) -> bool {
        self.enabled && self.source_auth_enabled
    }

    /// Whether the reconciler may mutate group membership
    #[must_use]
    pub const fn auto_manage_active(&self) -> bool {
        self.enabled && self.auto_manage_group
    }

    /// Names of the fields that differ between two snapshots
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! diff {
            ($($field:ident),* $(,)?) => {
                $(if self.$field != other.$field {
                    changed.push(stringify!($field));
                })*
            };
        }
        diff!(
            enabled,
            source_auth_enabled,
            group_name,
            min_trust_level,
            auto_manage_group,
            force_exclude,
            icecast_status_url,
            icecast_basic_auth_user,
            icecast_basic_auth_password,
            icecast_timeout_seconds,
            stream_tag_options,
            streams_cache_seconds,
            status_cache_seconds,
            streams_page_requires_login,
        );
        changed
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "[redacted]"
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PipeList {
    Joined(String),
    List(Vec<String>),
}

impl PipeList {
    fn into_items(self) -> Vec<String> {
        let items = match self {
            Self::Joined(raw) => raw.split('|').map(str::to_string).collect(),
            Self::List(list) => list,
        };
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

/// Accept either `"a|b|c"` or `["a", "b", "c"]`
fn deserialize_pipe_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(PipeList::deserialize(deserializer)?.into_items())
}

fn deserialize_username_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_pipe_list(deserializer)?
        .into_iter()
        .map(|u| u.to_lowercase())
        .collect())
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STREAMERS_SERVER__HTTP_PORT, STREAMERS_STREAMERS__GROUP_NAME, ...
        builder = builder.add_source(
            Environment::with_prefix("STREAMERS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn uses_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }

    /// Check the configuration for mistakes that would only surface later
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.server.instance_name.trim().is_empty() {
            errors.push("server.instance_name must not be blank".to_string());
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if self.sweep.batch_size == 0 {
            errors.push("sweep.batch_size must be non-zero".to_string());
        }
        if self.sweep.interval_seconds == 0 {
            errors.push("sweep.interval_seconds must be non-zero".to_string());
        }
        let status_url = self.streamers.icecast_status_url.trim();
        if !status_url.is_empty() {
            match url::Url::parse(status_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "streamers.icecast_status_url has unsupported scheme '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("streamers.icecast_status_url is invalid: {e}")),
            }
        }
        if self.streamers.icecast_timeout_seconds == 0 {
            errors.push("streamers.icecast_timeout_seconds must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(!config.uses_database());
        assert!(config.server.http_port > 0);
        assert_eq!(config.sweep.interval_seconds, 3600);
        assert!(!config.streamers.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_address() {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                http_port: 9000,
                instance_name: "default".to_string(),
            },
            ..Config::default()
        };

        assert_eq!(config.http_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_load_from_file_accepts_pipe_and_list_forms() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[streamers]
enabled = true
group_name = "Streamers"
force_exclude = " Mallory | |EVE "
stream_tag_options = ["ASMR", " Talk ", ""]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.streamers.enabled);
        assert_eq!(config.streamers.force_exclude, vec!["mallory", "eve"]);
        assert_eq!(config.streamers.stream_tag_options, vec!["ASMR", "Talk"]);
        assert_eq!(config.streamers.normalized_group_name(), "streamers");
        assert!(config.streamers.is_excluded("Mallory"));
        assert!(!config.streamers.is_excluded("alice"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        config.sweep.batch_size = 0;
        config.streamers.icecast_status_url = "ftp://example.com/status".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_changed_fields() {
        let before = StreamersSettings::default();
        let mut after = before.clone();
        after.min_trust_level = 3;
        after.streams_cache_seconds = 0;

        assert_eq!(
            before.changed_fields(&after),
            vec!["min_trust_level", "streams_cache_seconds"]
        );
        assert!(before.changed_fields(&before).is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = StreamersSettings {
            icecast_basic_auth_password: "hunter2".to_string(),
            ..StreamersSettings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));

        let auth = AuthConfig {
            jwt_secret: "s3cret".to_string(),
            webhook_secret: String::new(),
        };
        assert!(!format!("{auth:?}").contains("s3cret"));
    }
}
