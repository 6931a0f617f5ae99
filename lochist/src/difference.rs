use crate::gateway::{FileSystemGateway, LiveEntry};
use crate::history::LocalHistory;
use crate::revert::RevertError;
use lochist_base::{path, Timestamp};
use log::{debug, trace};
use std::collections::{BTreeMap, HashSet};
use std::io;

/// State of one entry at some point in history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub is_directory: bool,
    pub timestamp: Timestamp,
    /// None for directories and for files whose content is unavailable.
    pub content: Option<Vec<u8>>,
}

/// Entry before and after. `left` missing means created, `right` missing means deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Difference {
    pub left: Option<Entry>,
    pub right: Option<Entry>,
}

impl Entry {
    pub fn name(&self) -> &str {
        path::name(&self.path)
    }

    /// Whether the two entries have the same kind and content.
    pub fn same_as(&self, other: &Entry) -> bool {
        self.is_directory == other.is_directory
            && (self.is_directory || self.content == other.content)
    }
}

impl Difference {
    /// Pairs up two subtrees by path relative to their roots and by kind, parents first.
    ///
    /// `left` and `right` must each start with their root entry. An entry that turned from a
    /// file into a directory, or back, yields a deletion and a creation. Entries that exist on
    /// both sides, kept their names and did not change are left out.
    pub fn between(left: &[Entry], right: &[Entry]) -> Vec<Difference> {
        let by_relative = |entries: &[Entry]| -> BTreeMap<(String, bool), Entry> {
            let Some(root) = entries.first() else {
                return BTreeMap::new();
            };
            entries
                .iter()
                .filter_map(|e| {
                    path::relative(&root.path, &e.path)
                        .map(|rel| ((rel.to_string(), e.is_directory), e.clone()))
                })
                .collect()
        };
        let mut left = by_relative(left);
        let mut right = by_relative(right);
        let mut keys: Vec<(String, bool)> = left.keys().chain(right.keys()).cloned().collect();
        keys.sort_by(|(a, a_dir), (b, b_dir)| {
            path::depth(a)
                .cmp(&path::depth(b))
                .then_with(|| a.cmp(b))
                .then_with(|| a_dir.cmp(b_dir))
        });
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let l = left.remove(&key);
                let r = right.remove(&key);
                match (&l, &r) {
                    (Some(a), Some(b)) if a.name() == b.name() && a.same_as(b) => None,
                    (None, None) => None,
                    _ => Some(Difference { left: l, right: r }),
                }
            })
            .collect()
    }
}

/// Brings a live tree back to the left side of a list of differences.
pub struct DifferenceReverter<'a> {
    history: &'a LocalHistory,
    differences: Vec<Difference>,
    name: Option<String>,
}

impl<'a> DifferenceReverter<'a> {
    pub fn new(history: &'a LocalHistory, differences: Vec<Difference>) -> Self {
        DifferenceReverter {
            history,
            differences,
            name: None,
        }
    }

    /// Name of the change-set recording the revert.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Applies the differences back to front, inside one recorded change-set.
    ///
    /// Every step checks the live state first, so running it again after a partial failure is
    /// safe.
    pub fn revert<G: FileSystemGateway + ?Sized>(
        &self,
        gateway: &mut G,
        revert_content_changes: bool,
    ) -> Result<(), RevertError> {
        self.history.begin_change_set();
        let result = {
            let mut tracked = self.history.tracked(gateway);
            self.apply(&mut tracked, revert_content_changes)
        };
        self.history.end_change_set(self.name.as_deref());
        Ok(result?)
    }

    fn apply(&self, gateway: &mut dyn FileSystemGateway, revert_content: bool) -> io::Result<()> {
        let renamed: Vec<(&str, &str)> = self
            .differences
            .iter()
            .filter_map(|d| match (&d.left, &d.right) {
                (Some(l), Some(r)) if l.path != r.path => Some((l.path.as_str(), r.path.as_str())),
                _ => None,
            })
            .collect();
        let mut vetoed: HashSet<&str> = HashSet::new();

        for difference in self.differences.iter().rev() {
            match (&difference.left, &difference.right) {
                (None, Some(right)) => {
                    if vetoed.iter().any(|v| path::is_ancestor_or_self(&right.path, v)) {
                        trace!("{} holds entries being restored, kept", right.path);
                        continue;
                    }
                    if let Some(live) = gateway.find_live_entry(&right.path)? {
                        if live.is_directory == right.is_directory {
                            gateway.delete(&right.path)?;
                        }
                    }
                }
                (Some(left), None) => {
                    vetoed.insert(&left.path);
                    let target = current_location(&left.path, &renamed);
                    find_or_replace(gateway, &target, left.is_directory)?;
                    if !left.is_directory {
                        restore_content(gateway, &target, left)?;
                    }
                }
                (Some(left), Some(right)) => {
                    vetoed.insert(&left.path);
                    let (mut live, created) =
                        find_or_replace(gateway, &right.path, left.is_directory)?;
                    if left.name() != right.name() {
                        let occupant = path::with_name(&live.path, left.name());
                        if gateway.find_live_entry(&occupant)?.is_some() {
                            gateway.delete(&occupant)?;
                        }
                        live = gateway.rename(&live.path, left.name())?;
                    }
                    if revert_content
                        && !left.is_directory
                        && !live.is_directory
                        && (created || live.timestamp != left.timestamp)
                    {
                        restore_content(gateway, &live.path, left)?;
                    }
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}

/// Where an entry of the left side lives now, given the renames still to be undone.
fn current_location(left_path: &str, renamed: &[(&str, &str)]) -> String {
    renamed
        .iter()
        .filter(|(from, _)| path::is_ancestor(from, left_path))
        .max_by_key(|(from, _)| from.len())
        .and_then(|(from, to)| path::rebase(left_path, from, to))
        .unwrap_or_else(|| left_path.to_string())
}

/// Finds or creates `p` as the given kind, returning whether it had to be created. Files standing
/// where a directory is needed, on `p` or on any of its parents, are deleted first, and so is a
/// directory standing where a file is needed.
fn find_or_replace(
    gateway: &mut dyn FileSystemGateway,
    p: &str,
    is_directory: bool,
) -> io::Result<(LiveEntry, bool)> {
    let mut parents = vec![];
    let mut ancestor = path::parent(p);
    while let Some(dir) = ancestor {
        parents.push(dir);
        ancestor = path::parent(dir);
    }
    for dir in parents.into_iter().rev() {
        match gateway.find_live_entry(dir)? {
            Some(live) if !live.is_directory => {
                debug!("{dir} is a file where a directory is restored, replaced");
                gateway.delete(dir)?;
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
    if let Some(live) = gateway.find_live_entry(p)? {
        if live.is_directory == is_directory {
            return Ok((live, false));
        }
        debug!("{p} changed kind, replaced");
        gateway.delete(p)?;
    }
    Ok((gateway.find_or_create(p, is_directory)?, true))
}

fn restore_content(gateway: &mut dyn FileSystemGateway, target: &str, left: &Entry) -> io::Result<()> {
    match &left.content {
        Some(bytes) => gateway.set_content(target, bytes, left.timestamp),
        None => {
            debug!("content of {} is unavailable, not restored", left.path);
            Ok(())
        }
    }
}
