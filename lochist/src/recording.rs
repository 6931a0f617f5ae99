use crate::change::{Change, DeletedEntry};
use crate::content::Content;
use crate::gateway::{not_found, FileSystemGateway, LiveEntry};
use crate::history::LocalHistory;
use lochist_base::{path, Timestamp};
use log::trace;
use std::io;

/// Gateway decorator logging every successful mutation into the history.
///
/// Changes go into the open change-set, or each into one of its own when none is open.
pub struct RecordingGateway<'a, G: FileSystemGateway + ?Sized> {
    history: &'a LocalHistory,
    inner: &'a mut G,
}

impl<'a, G: FileSystemGateway + ?Sized> RecordingGateway<'a, G> {
    pub fn new(history: &'a LocalHistory, inner: &'a mut G) -> Self {
        RecordingGateway { history, inner }
    }

    /// Creates a file with `bytes`, or overwrites an existing one logging its previous content.
    pub fn write(&mut self, p: &str, bytes: &[u8], timestamp: Timestamp) -> io::Result<LiveEntry> {
        let existed = self.inner.find_live_entry(p)?.is_some();
        let entry = self.find_or_create(p, false)?;
        if existed {
            self.set_content(&entry.path, bytes, timestamp)?;
        } else {
            self.inner.set_content(&entry.path, bytes, timestamp)?;
        }
        self.inner
            .find_live_entry(&entry.path)?
            .ok_or_else(|| not_found(&entry.path))
    }

    fn keep(&self, bytes: Option<Vec<u8>>) -> Content {
        match bytes {
            Some(bytes) => self.history.store_content(&bytes),
            None => Content::Unavailable,
        }
    }

    /// The entry at `p` and everything below it, parents first, with file bytes not yet stored.
    fn capture_subtree(&self, root: &LiveEntry) -> io::Result<Vec<(DeletedEntry, Option<Vec<u8>>)>> {
        let mut entries = vec![];
        let mut pending = vec![root.clone()];
        while let Some(entry) = pending.pop() {
            let bytes = if entry.is_directory {
                None
            } else {
                self.inner.content(&entry.path)?
            };
            let relative = path::relative(&root.path, &entry.path).unwrap_or_default();
            let deleted = DeletedEntry {
                relative_path: relative.to_string(),
                is_directory: entry.is_directory,
                timestamp: entry.timestamp,
                content: Content::Unavailable,
            };
            entries.push((deleted, bytes));
            if entry.is_directory {
                let mut children = self.inner.children(&entry.path)?;
                children.reverse();
                pending.extend(children);
            }
        }
        Ok(entries)
    }
}

impl<'a, G: FileSystemGateway + ?Sized> FileSystemGateway for RecordingGateway<'a, G> {
    fn find_live_entry(&self, p: &str) -> io::Result<Option<LiveEntry>> {
        self.inner.find_live_entry(p)
    }

    fn find_or_create(&mut self, p: &str, is_directory: bool) -> io::Result<LiveEntry> {
        let p = path::normalize(p);
        if let Some(entry) = self.inner.find_live_entry(&p)? {
            if entry.is_directory == is_directory {
                return Ok(entry);
            }
        }
        let mut missing = vec![];
        let mut ancestor = path::parent(&p);
        while let Some(dir) = ancestor {
            if self.inner.find_live_entry(dir)?.is_some() {
                break;
            }
            missing.push(dir.to_string());
            ancestor = path::parent(dir);
        }

        let entry = self.inner.find_or_create(&p, is_directory)?;
        for dir in missing.iter().rev() {
            self.history.add_change(Change::create_directory(dir));
        }
        let change = if is_directory {
            Change::create_directory(&entry.path)
        } else {
            Change::create_file(&entry.path, entry.timestamp)
        };
        trace!("created {}", entry.path);
        self.history.add_change(change);
        Ok(entry)
    }

    fn delete(&mut self, p: &str) -> io::Result<()> {
        let p = path::normalize(p);
        let entry = self.inner.find_live_entry(&p)?.ok_or_else(|| not_found(&p))?;
        let captured = self.capture_subtree(&entry)?;
        self.inner.delete(&p)?;
        let entries: Vec<DeletedEntry> = captured
            .into_iter()
            .map(|(deleted, bytes)| DeletedEntry {
                content: self.keep(bytes),
                ..deleted
            })
            .collect();
        trace!("deleted {p} with {} entries", entries.len());
        self.history.add_change(Change::delete(&p, entries));
        Ok(())
    }

    fn rename(&mut self, p: &str, new_name: &str) -> io::Result<LiveEntry> {
        let p = path::normalize(p);
        let entry = self.inner.rename(&p, new_name)?;
        if entry.path != p {
            self.history
                .add_change(Change::rename(&entry.path, path::name(&p)));
        }
        Ok(entry)
    }

    fn set_content(&mut self, p: &str, bytes: &[u8], timestamp: Timestamp) -> io::Result<()> {
        let p = path::normalize(p);
        let entry = self.inner.find_live_entry(&p)?.ok_or_else(|| not_found(&p))?;
        let old_bytes = self.inner.content(&p)?;
        self.inner.set_content(&p, bytes, timestamp)?;
        let old_content = self.keep(old_bytes);
        self.history
            .add_change(Change::content(&p, old_content, entry.timestamp));
        Ok(())
    }

    fn content(&self, p: &str) -> io::Result<Option<Vec<u8>>> {
        self.inner.content(p)
    }

    fn children(&self, p: &str) -> io::Result<Vec<LiveEntry>> {
        self.inner.children(p)
    }
}

#[cfg(test)]
mod tests {
    use crate::change::{Change, StructuralKind};
    use crate::content::ContentSource;
    use crate::gateway::{FileSystemGateway, LiveEntry};
    use crate::history::LocalHistory;
    use crate::memory_fs::MemoryFs;
    use crate::store::SessionStamp;
    use lochist_base::Timestamp;
    use std::io;

    #[test]
    fn logs_parents_and_old_content() {
        let history = LocalHistory::temporary(SessionStamp(1)).unwrap();
        let mut fs = MemoryFs::new();
        {
            let mut tracked = history.tracked(&mut fs);
            tracked.write("/a/b.txt", b"one", Timestamp(5)).unwrap();
            tracked.write("/a/b.txt", b"two", Timestamp(6)).unwrap();
        }
        let sets: Vec<_> = history.change_sets().collect();
        // newest first: content, file, directory
        assert_eq!(sets.len(), 3);
        assert!(sets[2].is_creational_for("/a"));
        assert!(sets[1].is_creational_for("/a/b.txt"));
        match &sets[0].changes()[0] {
            Change::Content(c) => {
                assert_eq!(history.load(&c.old_content), Some(b"one".to_vec()));
                assert_eq!(c.old_timestamp, Timestamp(5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fs.read("/a/b.txt"), Some(&b"two"[..]));
    }

    #[test]
    fn delete_captures_subtree() {
        let history = LocalHistory::temporary(SessionStamp(1)).unwrap();
        let mut fs = MemoryFs::new();
        fs.write("/d/x", b"x").unwrap();
        fs.write("/d/e/y", b"y").unwrap();
        history.tracked(&mut fs).delete("/d").unwrap();

        let deleted = history.change_sets().next().unwrap();
        let Change::Structural(change) = &deleted.changes()[0] else {
            panic!("expected a structural change");
        };
        let StructuralKind::Delete { entries } = &change.kind else {
            panic!("expected a delete");
        };
        let relative: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(relative, vec!["", "e", "e/y", "x"]);
        assert_eq!(history.load(&entries[2].content), Some(b"y".to_vec()));
        assert!(!fs.exists("/d"));
    }

    /// Rejects every mutation after construction.
    struct ReadOnly(MemoryFs);

    impl FileSystemGateway for ReadOnly {
        fn find_live_entry(&self, p: &str) -> io::Result<Option<LiveEntry>> {
            self.0.find_live_entry(p)
        }

        fn find_or_create(&mut self, p: &str, _is_directory: bool) -> io::Result<LiveEntry> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, p.to_string()))
        }

        fn delete(&mut self, p: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, p.to_string()))
        }

        fn rename(&mut self, p: &str, _new_name: &str) -> io::Result<LiveEntry> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, p.to_string()))
        }

        fn set_content(&mut self, p: &str, _bytes: &[u8], _timestamp: Timestamp) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, p.to_string()))
        }

        fn content(&self, p: &str) -> io::Result<Option<Vec<u8>>> {
            self.0.content(p)
        }

        fn children(&self, p: &str) -> io::Result<Vec<LiveEntry>> {
            self.0.children(p)
        }
    }

    #[test]
    fn failed_mutations_store_no_content() {
        let history = LocalHistory::temporary(SessionStamp(1)).unwrap();
        let mut fs = MemoryFs::new();
        fs.write("/d/x", b"x").unwrap();
        let mut read_only = ReadOnly(fs);
        {
            let mut tracked = history.tracked(&mut read_only);
            assert!(tracked.set_content("/d/x", b"new", Timestamp(9)).is_err());
            assert!(tracked.delete("/d").is_err());
        }
        assert_eq!(history.store().header().unwrap().last_content, 0);
        assert!(history.change_sets().next().is_none());
        assert_eq!(read_only.0.read("/d/x"), Some(&b"x"[..]));
    }
}
