use lochist_base::ContentId;
use rkyv::{Archive, Deserialize, Serialize};

/// Reference to a content blob held by the store.
#[derive(
    Archive,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub enum Content {
    Stored(ContentId),
    /// Never stored, failed to store, or purged.
    Unavailable,
}

impl Content {
    pub fn id(&self) -> Option<ContentId> {
        match self {
            Content::Stored(id) => Some(*id),
            Content::Unavailable => None,
        }
    }
}

/// Resolves content references into bytes.
pub trait ContentSource {
    /// None when the content is unavailable, including blobs that were purged after the
    /// reference was taken.
    fn load(&self, content: &Content) -> Option<Vec<u8>>;
}
