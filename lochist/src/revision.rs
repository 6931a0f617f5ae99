use crate::change_set::ChangeSet;
use crate::difference::{Difference, Entry};
use crate::gateway::FileSystemGateway;
use crate::history::LocalHistory;
use crate::memory_fs::MemoryFs;
use crate::revert::InverseApplier;
use lochist_base::path;
use log::{debug, trace};
use std::collections::HashSet;
use std::io;

pub type RevisionEntry = Entry;

/// Live state of a path.
#[derive(Clone, Debug)]
pub struct CurrentRevision {
    pub path: String,
    /// The entry and everything below it, parents first. Empty when the path does not exist.
    pub entries: Vec<RevisionEntry>,
}

/// State of a path right after a change-set, reconstructed by undoing every later change-set.
#[derive(Clone, Debug)]
pub struct ChangeRevision {
    pub change_set: ChangeSet,
    /// Path the entry had at that point.
    pub path: String,
    pub entries: Vec<RevisionEntry>,
}

#[derive(Clone, Debug)]
pub enum Revision {
    Current(CurrentRevision),
    Change(ChangeRevision),
}

impl Revision {
    pub fn path(&self) -> &str {
        match self {
            Revision::Current(r) => &r.path,
            Revision::Change(r) => &r.path,
        }
    }

    pub fn entries(&self) -> &[RevisionEntry] {
        match self {
            Revision::Current(r) => &r.entries,
            Revision::Change(r) => &r.entries,
        }
    }

    /// The tracked entry itself, None when it did not exist.
    pub fn entry(&self) -> Option<&RevisionEntry> {
        self.entries().first()
    }

    pub fn change_set(&self) -> Option<&ChangeSet> {
        match self {
            Revision::Current(_) => None,
            Revision::Change(r) => Some(&r.change_set),
        }
    }

    /// What has to change to get from `newer` back to this revision.
    pub fn differences_from(&self, newer: &Revision) -> Vec<Difference> {
        Difference::between(self.entries(), newer.entries())
    }
}

/// Case-insensitive match on a change-set name or label.
#[derive(Clone, Debug)]
pub struct NameFilter {
    pattern: String,
}

impl NameFilter {
    pub fn new(pattern: impl AsRef<str>) -> Self {
        NameFilter {
            pattern: pattern.as_ref().trim().to_lowercase(),
        }
    }

    pub fn matches(&self, change_set: &ChangeSet) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        [change_set.name(), change_set.label()]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(&self.pattern))
    }
}

/// Builds the list of revisions of one path, newest first.
pub struct RevisionsCollector<'a> {
    history: &'a LocalHistory,
    path: String,
    filter: Option<NameFilter>,
}

impl<'a> RevisionsCollector<'a> {
    pub fn new(history: &'a LocalHistory, path: impl AsRef<str>) -> Self {
        RevisionsCollector {
            history,
            path: path::normalize(path.as_ref()),
            filter: None,
        }
    }

    pub fn filtered(mut self, pattern: impl AsRef<str>) -> Self {
        self.filter = Some(NameFilter::new(pattern));
        self
    }

    fn matches(&self, change_set: &ChangeSet) -> bool {
        self.filter
            .as_ref()
            .map(|filter| filter.matches(change_set))
            .unwrap_or(true)
    }

    /// The current revision followed by one revision per change-set touching the path.
    ///
    /// History is replayed backwards on a copy of `live`; the walk ends at the change-set that
    /// created the path or where the log ends.
    pub fn collect(&self, live: &dyn FileSystemGateway) -> io::Result<Vec<Revision>> {
        let mut revisions = vec![Revision::Current(CurrentRevision {
            path: self.path.clone(),
            entries: entries_under(live, &self.path, &HashSet::new())?,
        })];

        let mut snapshot = MemoryFs::capture(live)?;
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut tracked = self.path.clone();
        for change_set in self.history.change_sets() {
            if change_set.affects_path(&tracked) && self.matches(&change_set) {
                trace!("{tracked} has a revision at {}", change_set.id());
                revisions.push(Revision::Change(ChangeRevision {
                    change_set: change_set.clone(),
                    path: tracked.clone(),
                    entries: entries_under(&snapshot, &tracked, &unavailable)?,
                }));
            }
            let created = change_set.is_creational_for(&tracked);

            let mut applier = InverseApplier::new(&mut snapshot, self.history)
                .lenient()
                .with_unavailable(std::mem::take(&mut unavailable));
            if let Err(e) = change_set.accept(&mut applier) {
                debug!("replay of {} stopped: {e}", change_set.id());
            }
            unavailable = applier.into_unavailable();

            tracked = change_set.path_before(&tracked);
            if created {
                break;
            }
        }
        Ok(revisions)
    }
}

/// The entry at `p` and its subtree, parents first, read through `gateway`.
fn entries_under(
    gateway: &dyn FileSystemGateway,
    p: &str,
    unavailable: &HashSet<String>,
) -> io::Result<Vec<Entry>> {
    let Some(root) = gateway.find_live_entry(p)? else {
        return Ok(vec![]);
    };
    let mut entries = vec![];
    let mut pending = vec![root];
    while let Some(live) = pending.pop() {
        let content = if live.is_directory || unavailable.contains(&live.path) {
            None
        } else {
            gateway.content(&live.path)?
        };
        if live.is_directory {
            let mut children = gateway.children(&live.path)?;
            children.reverse();
            pending.extend(children);
        }
        entries.push(Entry {
            path: live.path,
            is_directory: live.is_directory,
            timestamp: live.timestamp,
            content,
        });
    }
    Ok(entries)
}
