//! Optional arguments of repository calls.

/// Options accepted by create and list operations.
///
/// ```ignore
/// let opts = Options::new().with_public_id("hcst_1234567890").with_limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub(crate) public_id: Option<String>,
    pub(crate) limit: i64,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `public_id` instead of generating one. It must carry the
    /// entity's prefix.
    #[must_use]
    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    /// Caps list results. `0` keeps the repository default and a negative
    /// value lifts the cap.
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Effective row cap given the repository default, `None` meaning no cap.
    pub(crate) fn resolve_limit(&self, default_limit: i64) -> Option<usize> {
        let limit = if self.limit != 0 { self.limit } else { default_limit };
        usize::try_from(limit).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_to_repository_limit() {
        assert_eq!(Options::new().resolve_limit(10_000), Some(10_000));
    }

    #[test]
    fn test_limit_override() {
        assert_eq!(Options::new().with_limit(5).resolve_limit(10_000), Some(5));
    }

    #[test]
    fn test_negative_limit_is_unlimited() {
        assert_eq!(Options::new().with_limit(-1).resolve_limit(10_000), None);
        assert_eq!(Options::new().resolve_limit(-1), None);
    }

    #[test]
    fn test_public_id_option() {
        let opts = Options::new().with_public_id("hst_1234567890");
        assert_eq!(opts.public_id.as_deref(), Some("hst_1234567890"));
    }
}
