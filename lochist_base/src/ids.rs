use rkyv::{Archive, Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Position of a record in the change log. Allocated in append order, never reused, 0 is "none".
#[derive(
    Archive,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct RecordId(pub u64);

/// Identity of a change-set, handed out by the store before the set is written.
#[derive(
    Archive,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct ChangeSetId(pub i64);

/// Key of a content blob kept next to the records.
#[derive(
    Archive,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct ContentId(pub u64);

impl RecordId {
    pub const NONE: RecordId = RecordId(0);

    /// Wraps a raw link, 0 meaning "no record".
    pub fn from_link(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(RecordId(raw))
        }
    }

    pub fn to_link(id: Option<RecordId>) -> u64 {
        id.map(|id| id.0).unwrap_or(0)
    }

    pub fn next(&self) -> RecordId {
        RecordId(self.0 + 1)
    }

    /// Big-endian, so that sled key order is numeric order.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(RecordId(u64::from_be_bytes(bytes)))
    }
}

impl ContentId {
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(ContentId(u64::from_be_bytes(bytes)))
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl Display for ChangeSetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::RecordId;

    #[test]
    fn key_order_is_numeric_order() {
        let small = RecordId(255).to_bytes();
        let big = RecordId(256).to_bytes();
        assert!(small < big);
        assert_eq!(RecordId::from_bytes(&big), Some(RecordId(256)));
        assert_eq!(RecordId::from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn zero_link_is_none() {
        assert_eq!(RecordId::from_link(0), None);
        assert_eq!(RecordId::from_link(7), Some(RecordId(7)));
        assert_eq!(RecordId::to_link(None), 0);
    }
}
