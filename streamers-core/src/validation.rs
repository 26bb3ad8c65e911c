//! Input validation and sanitisation
//!
//! Every field that reaches the live-status view or the settings store from
//! an untrusted source passes through here.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::UserId;

// ============================================================================
// Canonical validation limits
// ============================================================================

/// Maximum stream tag length in characters
pub const STREAM_TAG_MAX: usize = 64;
/// Maximum mount path length
pub const MOUNT_MAX: usize = 255;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("stream tag must be at most {max} characters")]
    TagTooLong { max: usize },

    #[error("stream tag is not one of the configured options")]
    TagNotAllowed,

    #[error("invalid mount: {0}")]
    MountInvalid(String),

    #[error("mount is already assigned to another user")]
    MountTaken,
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TagTooLong { .. } => "tag_too_long",
            Self::TagNotAllowed => "tag_not_allowed",
            Self::MountInvalid(_) => "mount_invalid",
            Self::MountTaken => "mount_taken",
        }
    }
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Tags whose content is dropped entirely instead of being unwrapped
static DROPPED_CONTENT_TAGS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ["script", "style", "iframe", "noscript", "template"].into_iter().collect());

/// Reduce untrusted text to plain, trimmed text.
///
/// All markup is removed, the entities the cleaner emits are decoded except
/// `&lt;`/`&gt;` (so the output can never re-form a tag), and C0 control
/// characters plus DEL are removed.
#[must_use]
pub fn sanitize_text(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let stripped = ammonia::Builder::empty()
        .clean_content_tags(DROPPED_CONTENT_TAGS.clone())
        .clean(value)
        .to_string();

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded
        .chars()
        .filter(|c| !matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitise a stored stream tag for display.
///
/// A tag that is still longer than [`STREAM_TAG_MAX`] after sanitisation is
/// dropped, never truncated.
#[must_use]
pub fn sanitize_stream_tag(value: Option<&str>) -> Option<String> {
    let tag = sanitize_text(value.unwrap_or_default());
    if tag.is_empty() || tag.chars().count() > STREAM_TAG_MAX {
        None
    } else {
        Some(tag)
    }
}

/// Normalise a mount path: trim whitespace and enforce a leading `/`.
///
/// Returns an empty string for blank input.
#[must_use]
pub fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Default mount for a user, e.g. `/u/42`
#[must_use]
pub fn default_mount(user_id: UserId) -> String {
    format!("/u/{user_id}")
}

/// The user whose default mount this is, if it is anyone's.
///
/// `/u/02` is not a default mount; only the exact form [`default_mount`]
/// produces counts.
#[must_use]
pub fn default_mount_owner(mount: &str) -> Option<UserId> {
    let owner = UserId::parse(mount.strip_prefix("/u/")?)?;
    (default_mount(owner) == mount).then_some(owner)
}

/// Mount validator for administratively assigned mounts
pub struct MountValidator {
    max_length: usize,
}

impl Default for MountValidator {
    fn default() -> Self {
        Self {
            max_length: MOUNT_MAX,
        }
    }
}

impl MountValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalise a mount path
    pub fn validate(&self, mount: &str) -> ValidationResult<String> {
        let mount = normalize_mount(mount);

        if mount.len() <= 1 {
            return Err(ValidationError::MountInvalid("must not be blank".to_string()));
        }

        if mount.len() > self.max_length {
            return Err(ValidationError::MountInvalid(format!(
                "must be at most {} characters",
                self.max_length
            )));
        }

        if !mount
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
        {
            return Err(ValidationError::MountInvalid(
                "can only contain letters, numbers, '/', '_', '-' and '.'".to_string(),
            ));
        }

        if mount.contains("//") || mount.split('/').any(|segment| segment == "..") {
            return Err(ValidationError::MountInvalid("malformed path".to_string()));
        }

        Ok(mount)
    }
}

/// Stream tag validator bound to the configured option set
pub struct StreamTagValidator<'a> {
    options: &'a [String],
}

impl<'a> StreamTagValidator<'a> {
    #[must_use]
    pub const fn new(options: &'a [String]) -> Self {
        Self { options }
    }

    /// Validate a requested tag.
    ///
    /// Blank input clears the tag (`Ok(None)`). Otherwise the tag must match
    /// one of the options case-insensitively and is returned in the option's
    /// canonical spelling.
    pub fn validate(&self, tag: Option<&str>) -> ValidationResult<Option<String>> {
        let tag = tag.map(str::trim).unwrap_or_default();
        if tag.is_empty() {
            return Ok(None);
        }

        if tag.chars().count() > STREAM_TAG_MAX {
            return Err(ValidationError::TagTooLong {
                max: STREAM_TAG_MAX,
            });
        }

        let wanted = tag.to_lowercase();
        self.options
            .iter()
            .find(|option| option.trim().to_lowercase() == wanted)
            .map(|option| Some(option.trim().to_string()))
            .ok_or(ValidationError::TagNotAllowed)
    }
}
