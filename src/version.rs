//! Version allocator
//!
//! Every run carries a `major.minor.patch` version. New runs on a branch take
//! the head's version with the patch segment bumped; major and minor are only
//! ever carried through.
//!
//! Malformed versions never fail allocation: an unparseable patch segment is
//! read as `0`, so `"1.0.x"` allocates `"1.0.1"`.

use std::cmp::Ordering;
use std::fmt;

/// Version assigned to the first run on a branch.
pub const INITIAL_VERSION: &str = "1.0.0";

/// Compute the version for the next run on a branch.
///
/// # Examples
///
/// ```rust
/// use run_lineage::version::next_version;
///
/// assert_eq!(next_version(None), "1.0.0");
/// assert_eq!(next_version(Some("2.3.9")), "2.3.10");
/// assert_eq!(next_version(Some("1.0.x")), "1.0.1");
/// ```
#[must_use]
pub fn next_version(current: Option<&str>) -> String {
    let Some(current) = current else {
        return INITIAL_VERSION.to_string();
    };

    let mut parts = current.split('.');
    let major = parts.next().unwrap_or("").trim();
    let minor = parts.next().unwrap_or("").trim();
    let patch = parts
        .next()
        .and_then(|p| p.trim().parse::<u64>().ok())
        .unwrap_or(0);

    format!("{major}.{minor}.{}", patch.saturating_add(1))
}

/// Parsed `major.minor.patch` triple with semantic-version ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SemanticVersion {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
}

impl SemanticVersion {
    /// Build a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a strict `major.minor.patch` string.
    ///
    /// Returns `None` unless there are exactly three numeric segments.
    #[must_use]
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Parse with the allocator's fallback: any unreadable segment counts as `0`.
    #[must_use]
    pub fn parse_lenient(version: &str) -> Self {
        let mut parts = version
            .trim()
            .split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0));
        Self::new(
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Allocate a version strictly greater than `superseded`.
///
/// Starts from [`next_version`] of the branch head and, if the run currently
/// marked latest on the branch already sits at or above that, bumps from the
/// latest run's version instead.
pub(crate) fn allocate_above(head: Option<&str>, superseded: Option<&str>) -> String {
    let candidate = next_version(head);
    match superseded {
        Some(latest)
            if SemanticVersion::parse_lenient(&candidate)
                <= SemanticVersion::parse_lenient(latest) =>
        {
            let latest = SemanticVersion::parse_lenient(latest);
            SemanticVersion::new(latest.major, latest.minor, latest.patch.saturating_add(1))
                .to_string()
        }
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_initial() {
        assert_eq!(next_version(None), "1.0.0");
    }

    #[test]
    fn test_next_version_bumps_patch() {
        assert_eq!(next_version(Some("1.0.0")), "1.0.1");
        assert_eq!(next_version(Some("2.3.9")), "2.3.10");
    }

    #[test]
    fn test_next_version_malformed_patch_falls_back_to_zero() {
        assert_eq!(next_version(Some("1.0.x")), next_version(Some("1.0.0")));
        assert_eq!(next_version(Some("3.1")), "3.1.1");
    }

    #[test]
    fn test_semver_ordering_is_numeric() {
        let a = SemanticVersion::parse("1.0.9").unwrap();
        let b = SemanticVersion::parse("1.0.10").unwrap();
        assert!(a < b);
        assert!(SemanticVersion::parse("2.0.0").unwrap() > b);
    }

    #[test]
    fn test_semver_parse_rejects_garbage() {
        assert!(SemanticVersion::parse("1.0").is_none());
        assert!(SemanticVersion::parse("1.0.0.0").is_none());
        assert!(SemanticVersion::parse("a.b.c").is_none());
    }

    #[test]
    fn test_allocate_above_uses_latest_when_head_lags() {
        // head deleted after a later run took the latest pointer
        assert_eq!(allocate_above(Some("1.0.2"), Some("1.0.7")), "1.0.8");
        assert_eq!(allocate_above(Some("1.0.4"), Some("1.0.4")), "1.0.5");
        assert_eq!(allocate_above(None, None), "1.0.0");
    }
}
