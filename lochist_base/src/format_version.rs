use rkyv::{Archive, Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Version of the on-disk record layout.
#[derive(Archive, PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
#[archive(check_bytes)]
#[archive_attr(derive(PartialEq, Eq, Debug, Hash))]
pub struct FormatVersion {
    /// Backwards compatibility breaking
    pub major: u16,
    /// Backwards compatible additions, older readers cannot see them
    pub minor: u16,
}

impl FormatVersion {
    pub const fn new(major: u16, minor: u16) -> FormatVersion {
        FormatVersion { major, minor }
    }

    /// Whether data written with `stored` can be read by code at version self.
    pub fn can_read(&self, stored: &FormatVersion) -> bool {
        self.major == stored.major && stored.minor <= self.minor
    }
}

impl Display for FormatVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl PartialOrd for FormatVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FormatVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

#[cfg(test)]
mod tests {
    use super::FormatVersion;

    #[test]
    fn test_version_cmp() {
        assert!(FormatVersion::new(1, 0) > FormatVersion::new(0, 9));
        assert!(FormatVersion::new(0, 10) > FormatVersion::new(0, 9));
        assert_eq!(FormatVersion::new(0, 0), FormatVersion::new(0, 0));
    }

    #[test]
    fn readability() {
        let current = FormatVersion::new(2, 1);
        assert!(current.can_read(&FormatVersion::new(2, 0)));
        assert!(current.can_read(&FormatVersion::new(2, 1)));
        assert!(!current.can_read(&FormatVersion::new(2, 2)));
        assert!(!current.can_read(&FormatVersion::new(1, 1)));
    }
}
