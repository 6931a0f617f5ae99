use crate::change_set::ChangeSet;
use crate::content::Content;
use lochist_base::{path, ContentId, Timestamp};
use rkyv::{Archive, Deserialize, Serialize};

/// Elementary operation inside a change-set.
#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub enum Change {
    Structural(StructuralChange),
    Content(ContentChange),
    PutLabel(PutLabelChange),
    PutSystemLabel(PutSystemLabelChange),
}

/// Change to the existence, name or type of an entry.
#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct StructuralChange {
    /// Path of the entry after the change.
    pub path: String,
    pub kind: StructuralKind,
}

#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub enum StructuralKind {
    CreateFile { timestamp: Timestamp },
    CreateDirectory,
    /// Deleted subtree, parents before children, the deleted entry itself first.
    Delete { entries: Vec<DeletedEntry> },
    /// Entry renamed within its parent, `path` holds the new name.
    Rename { old_name: String },
}

#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct DeletedEntry {
    /// Relative to the deleted path, empty for the deleted entry itself.
    pub relative_path: String,
    pub is_directory: bool,
    pub timestamp: Timestamp,
    pub content: Content,
}

/// File content replaced, the previous content is kept for reverting.
#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct ContentChange {
    pub path: String,
    pub old_content: Content,
    pub old_timestamp: Timestamp,
}

#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct PutLabelChange {
    pub name: String,
}

#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct PutSystemLabelChange {
    pub name: String,
    /// 0xRRGGBB
    pub color: u32,
}

/// Visitor driven over change-sets by `ChangeSet::accept` and `LocalHistory::accept`.
///
/// Returning an error from any callback aborts the traversal and surfaces the error to whoever
/// started it; visitors that only need to stop early can use [`StopVisiting`].
pub trait ChangeVisitor {
    type Error;

    fn begin(&mut self, _change_set: &ChangeSet) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_structural(&mut self, _change: &StructuralChange) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_content(&mut self, _change: &ContentChange) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_put_label(&mut self, _change: &PutLabelChange) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_put_system_label(
        &mut self,
        _change: &PutSystemLabelChange,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn end(&mut self, _change_set: &ChangeSet) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StopVisiting;

impl StructuralChange {
    /// Path the entry had before the change, differs from `path` only for renames.
    pub fn old_path(&self) -> String {
        match &self.kind {
            StructuralKind::Rename { old_name } => path::with_name(&self.path, old_name),
            _ => self.path.clone(),
        }
    }
}

impl Change {
    pub fn create_file(path: impl AsRef<str>, timestamp: Timestamp) -> Change {
        Change::Structural(StructuralChange {
            path: path::normalize(path.as_ref()),
            kind: StructuralKind::CreateFile { timestamp },
        })
    }

    pub fn create_directory(path: impl AsRef<str>) -> Change {
        Change::Structural(StructuralChange {
            path: path::normalize(path.as_ref()),
            kind: StructuralKind::CreateDirectory,
        })
    }

    pub fn delete(path: impl AsRef<str>, entries: Vec<DeletedEntry>) -> Change {
        Change::Structural(StructuralChange {
            path: path::normalize(path.as_ref()),
            kind: StructuralKind::Delete { entries },
        })
    }

    /// `path` is the new path, `old_name` the name the entry had in the same parent.
    pub fn rename(path: impl AsRef<str>, old_name: impl Into<String>) -> Change {
        Change::Structural(StructuralChange {
            path: path::normalize(path.as_ref()),
            kind: StructuralKind::Rename {
                old_name: old_name.into(),
            },
        })
    }

    pub fn content(path: impl AsRef<str>, old_content: Content, old_timestamp: Timestamp) -> Change {
        Change::Content(ContentChange {
            path: path::normalize(path.as_ref()),
            old_content,
            old_timestamp,
        })
    }

    pub fn put_label(name: impl Into<String>) -> Change {
        Change::PutLabel(PutLabelChange { name: name.into() })
    }

    pub fn put_system_label(name: impl Into<String>, color: u32) -> Change {
        Change::PutSystemLabel(PutSystemLabelChange {
            name: name.into(),
            color,
        })
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Change::Structural(c) => Some(&c.path),
            Change::Content(c) => Some(&c.path),
            Change::PutLabel(_) | Change::PutSystemLabel(_) => None,
        }
    }

    /// Whether the change touches `path`, an entry inside it or one of its parents.
    pub fn affects_path(&self, p: &str) -> bool {
        match self {
            Change::Structural(c) => {
                path::is_related(&c.path, p)
                    || matches!(c.kind, StructuralKind::Rename { .. })
                        && path::is_related(&c.old_path(), p)
            }
            Change::Content(c) => path::is_related(&c.path, p),
            Change::PutLabel(_) | Change::PutSystemLabel(_) => false,
        }
    }

    pub fn is_creational_for(&self, p: &str) -> bool {
        match self {
            Change::Structural(StructuralChange {
                path,
                kind: StructuralKind::CreateFile { .. } | StructuralKind::CreateDirectory,
            }) => path == p,
            _ => false,
        }
    }

    /// Paths the change touches, before and after for renames.
    pub fn affected_paths(&self) -> Vec<String> {
        match self {
            Change::Structural(c @ StructuralChange {
                kind: StructuralKind::Rename { .. },
                ..
            }) => vec![c.old_path(), c.path.clone()],
            Change::Structural(c) => vec![c.path.clone()],
            Change::Content(c) => vec![c.path.clone()],
            Change::PutLabel(_) | Change::PutSystemLabel(_) => vec![],
        }
    }

    /// Blobs only this change refers to, released when it is purged.
    pub fn contents_to_purge(&self) -> Vec<ContentId> {
        match self {
            Change::Content(c) => c.old_content.id().into_iter().collect(),
            Change::Structural(StructuralChange {
                kind: StructuralKind::Delete { entries },
                ..
            }) => entries.iter().filter_map(|e| e.content.id()).collect(),
            _ => vec![],
        }
    }

    /// Where an entry now at `p` was located before this change.
    pub fn path_before(&self, p: &str) -> String {
        match self {
            Change::Structural(c @ StructuralChange {
                kind: StructuralKind::Rename { .. },
                ..
            }) => path::rebase(p, &c.path, &c.old_path()).unwrap_or_else(|| p.to_string()),
            _ => p.to_string(),
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Change::PutLabel(_) | Change::PutSystemLabel(_))
    }

    pub fn accept<V: ChangeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        match self {
            Change::Structural(c) => visitor.visit_structural(c),
            Change::Content(c) => visitor.visit_content(c),
            Change::PutLabel(c) => visitor.visit_put_label(c),
            Change::PutSystemLabel(c) => visitor.visit_put_system_label(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment() {
        let create = Change::create_directory("/src");
        assert!(create.affects_path("/src"));
        assert!(create.affects_path("/src/main.rs"));
        assert!(create.affects_path("/"));
        assert!(!create.affects_path("/srcs"));
        assert!(create.is_creational_for("/src"));
        assert!(!create.is_creational_for("/src/main.rs"));
        assert!(!Change::put_label("release").affects_path("/src"));
    }

    #[test]
    fn renames_map_paths_back() {
        let rename = Change::rename("/dir/b.txt", "a.txt");
        assert!(rename.affects_path("/dir/a.txt"));
        assert!(rename.affects_path("/dir/b.txt"));
        assert_eq!(rename.path_before("/dir/b.txt"), "/dir/a.txt");
        assert_eq!(rename.path_before("/dir/other"), "/dir/other");
        assert_eq!(
            rename.affected_paths(),
            vec!["/dir/a.txt".to_string(), "/dir/b.txt".to_string()]
        );

        let dir_rename = Change::rename("/new", "old");
        assert_eq!(dir_rename.path_before("/new/x/y"), "/old/x/y");
    }

    #[test]
    fn purgeable_contents() {
        use lochist_base::ContentId;
        let change = Change::content("/a", Content::Stored(ContentId(4)), Timestamp(1));
        assert_eq!(change.contents_to_purge(), vec![ContentId(4)]);
        let delete = Change::delete(
            "/d",
            vec![
                DeletedEntry {
                    relative_path: "".into(),
                    is_directory: true,
                    timestamp: Timestamp(1),
                    content: Content::Unavailable,
                },
                DeletedEntry {
                    relative_path: "f".into(),
                    is_directory: false,
                    timestamp: Timestamp(1),
                    content: Content::Stored(ContentId(9)),
                },
            ],
        );
        assert_eq!(delete.contents_to_purge(), vec![ContentId(9)]);
        assert!(Change::create_file("/a", Timestamp(1))
            .contents_to_purge()
            .is_empty());
    }
}
