use serde::{Deserialize, Serialize};

/// Platform user id (assigned by the host platform)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Parse an id from its decimal string form.
    ///
    /// Host events are not consistent about sending numbers or strings.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.parse().ok().map(Self)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Platform group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        assert_eq!(UserId::parse("42"), Some(UserId(42)));
        assert_eq!(UserId::parse(" 7 "), Some(UserId(7)));
        assert_eq!(UserId::parse("-1"), None);
        assert_eq!(UserId::parse("abc"), None);
        assert_eq!(UserId::parse(""), None);
    }
}
