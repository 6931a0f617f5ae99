use crate::change::{Change, ChangeVisitor};
use crate::common::Error;
use lochist_base::{ChangeSetId, ContentId, Timestamp};
use rkyv::{Archive, Deserialize, Serialize};
use ron::ser::PrettyConfig;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Persisted form of a change-set.
#[derive(
    Archive, Clone, Debug, PartialEq, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct ChangeSetData {
    pub id: ChangeSetId,
    pub name: Option<String>,
    pub timestamp: Timestamp,
    /// Oldest first.
    pub changes: Vec<Change>,
}

/// Immutable change-set, cheap to clone and share between threads.
///
/// Two change-sets are equal when their ids are, regardless of payload.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    data: Arc<ChangeSetData>,
}

/// Change-set still receiving changes. Clones share the same set.
#[derive(Clone, Debug)]
pub struct ChangeSetBuilder {
    inner: Arc<Mutex<BuilderState>>,
}

#[derive(Debug)]
struct BuilderState {
    data: ChangeSetData,
    locked: Option<ChangeSet>,
}

impl From<ChangeSetData> for ChangeSet {
    fn from(data: ChangeSetData) -> Self {
        ChangeSet {
            data: Arc::new(data),
        }
    }
}

impl PartialEq for ChangeSet {
    fn eq(&self, other: &Self) -> bool {
        self.data.id == other.data.id
    }
}

impl Eq for ChangeSet {}

impl Hash for ChangeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.id.hash(state);
    }
}

impl ChangeSet {
    pub fn new(
        id: ChangeSetId,
        name: Option<String>,
        timestamp: Timestamp,
        changes: Vec<Change>,
    ) -> Self {
        ChangeSetData {
            id,
            name,
            timestamp,
            changes,
        }
        .into()
    }

    pub fn id(&self) -> ChangeSetId {
        self.data.id
    }

    pub fn name(&self) -> Option<&str> {
        self.data.name.as_deref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.data.timestamp
    }

    pub fn changes(&self) -> &[Change] {
        &self.data.changes
    }

    pub fn data(&self) -> &ChangeSetData {
        &self.data
    }

    /// Name if set, otherwise the label.
    pub fn display_name(&self) -> Option<&str> {
        self.name().or_else(|| self.label())
    }

    /// `begin`, every change newest first, then `end`.
    pub fn accept<V: ChangeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        visitor.begin(self)?;
        for change in self.changes().iter().rev() {
            change.accept(visitor)?;
        }
        visitor.end(self)
    }

    pub fn is_empty(&self) -> bool {
        self.changes().is_empty()
    }

    pub fn affects_path(&self, path: &str) -> bool {
        affects_path(self.changes(), path)
    }

    pub fn is_creational_for(&self, path: &str) -> bool {
        is_creational_for(self.changes(), path)
    }

    pub fn affected_paths(&self) -> Vec<String> {
        affected_paths(self.changes())
    }

    pub fn label(&self) -> Option<&str> {
        label(self.changes())
    }

    pub fn label_color(&self) -> Option<u32> {
        label_color(self.changes())
    }

    pub fn is_content_change_only(&self) -> bool {
        is_content_change_only(self.changes())
    }

    pub fn is_label_only(&self) -> bool {
        is_label_only(self.changes())
    }

    pub fn contents_to_purge(&self) -> Vec<ContentId> {
        self.changes()
            .iter()
            .flat_map(|c| c.contents_to_purge())
            .collect()
    }

    /// Where an entry at `path` after this change-set was located before it.
    pub fn path_before(&self, path: &str) -> String {
        self.changes()
            .iter()
            .rev()
            .fold(path.to_string(), |p, change| change.path_before(&p))
    }

    pub fn to_ron_pretty(&self) -> Result<String, Error> {
        ron::ser::to_string_pretty(&*self.data, PrettyConfig::default().compact_arrays(true))
            .map_err(|e| Error::Internal(format!("{e:?}")))
    }
}

impl ChangeSetBuilder {
    pub fn new(id: ChangeSetId, timestamp: Timestamp) -> Self {
        ChangeSetBuilder {
            inner: Arc::new(Mutex::new(BuilderState {
                data: ChangeSetData {
                    id,
                    name: None,
                    timestamp,
                    changes: vec![],
                },
                locked: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BuilderState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> ChangeSetId {
        self.state().data.id
    }

    /// Panics when the set is already locked, adding to a finished set is a bug in the caller.
    pub fn add_change(&self, change: Change) {
        let mut state = self.state();
        assert!(
            state.locked.is_none(),
            "change added to locked change-set {}",
            state.data.id
        );
        state.data.changes.push(change);
    }

    pub fn set_name(&self, name: Option<String>) {
        let mut state = self.state();
        assert!(
            state.locked.is_none(),
            "renaming locked change-set {}",
            state.data.id
        );
        state.data.name = name;
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked.is_some()
    }

    /// Freezes the set. Repeated calls return the same change-set.
    pub fn lock(&self) -> ChangeSet {
        let mut state = self.state();
        if let Some(locked) = &state.locked {
            return locked.clone();
        }
        let locked = ChangeSet::from(state.data.clone());
        state.locked = Some(locked.clone());
        locked
    }

    /// Frozen copy of what has been added so far.
    pub fn snapshot(&self) -> ChangeSet {
        let state = self.state();
        match &state.locked {
            Some(locked) => locked.clone(),
            None => ChangeSet::from(state.data.clone()),
        }
    }

    /// Visits a snapshot taken under the guard, so the visitor may call back into the writer.
    pub fn accept<V: ChangeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        self.snapshot().accept(visitor)
    }

    fn with_changes<T>(&self, f: impl FnOnce(&[Change]) -> T) -> T {
        let state = self.state();
        f(&state.data.changes)
    }

    pub fn len(&self) -> usize {
        self.with_changes(|changes| changes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with_changes(|changes| changes.is_empty())
    }

    pub fn affects_path(&self, path: &str) -> bool {
        self.with_changes(|changes| affects_path(changes, path))
    }

    pub fn is_creational_for(&self, path: &str) -> bool {
        self.with_changes(|changes| is_creational_for(changes, path))
    }

    pub fn affected_paths(&self) -> Vec<String> {
        self.with_changes(affected_paths)
    }

    pub fn label(&self) -> Option<String> {
        self.with_changes(|changes| label(changes).map(str::to_string))
    }

    pub fn label_color(&self) -> Option<u32> {
        self.with_changes(label_color)
    }

    pub fn is_content_change_only(&self) -> bool {
        self.with_changes(is_content_change_only)
    }

    pub fn is_label_only(&self) -> bool {
        self.with_changes(is_label_only)
    }
}

fn affects_path(changes: &[Change], path: &str) -> bool {
    changes.iter().any(|c| c.affects_path(path))
}

fn is_creational_for(changes: &[Change], path: &str) -> bool {
    changes.iter().any(|c| c.is_creational_for(path))
}

fn affected_paths(changes: &[Change]) -> Vec<String> {
    let mut paths: Vec<String> = vec![];
    for path in changes.iter().flat_map(|c| c.affected_paths()) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

fn label(changes: &[Change]) -> Option<&str> {
    changes.iter().find_map(|c| match c {
        Change::PutLabel(l) => Some(l.name.as_str()),
        Change::PutSystemLabel(l) => Some(l.name.as_str()),
        _ => None,
    })
}

fn label_color(changes: &[Change]) -> Option<u32> {
    changes.iter().find_map(|c| match c {
        Change::PutSystemLabel(l) => Some(l.color),
        _ => None,
    })
}

fn is_content_change_only(changes: &[Change]) -> bool {
    !changes.is_empty() && changes.iter().all(|c| matches!(c, Change::Content(_)))
}

fn is_label_only(changes: &[Change]) -> bool {
    !changes.is_empty() && changes.iter().all(Change::is_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ContentChange, StructuralChange};
    use crate::content::Content;

    #[derive(Default)]
    struct Order(Vec<String>);

    impl ChangeVisitor for Order {
        type Error = ();

        fn begin(&mut self, change_set: &ChangeSet) -> Result<(), ()> {
            self.0.push(format!("begin {}", change_set.id()));
            Ok(())
        }

        fn visit_structural(&mut self, change: &StructuralChange) -> Result<(), ()> {
            self.0.push(change.path.clone());
            Ok(())
        }

        fn visit_content(&mut self, change: &ContentChange) -> Result<(), ()> {
            self.0.push(format!("content {}", change.path));
            Ok(())
        }

        fn end(&mut self, change_set: &ChangeSet) -> Result<(), ()> {
            self.0.push(format!("end {}", change_set.id()));
            Ok(())
        }
    }

    fn sample() -> ChangeSetBuilder {
        let builder = ChangeSetBuilder::new(ChangeSetId(3), Timestamp(10));
        builder.add_change(Change::create_directory("/d"));
        builder.add_change(Change::create_file("/d/f", Timestamp(10)));
        builder.add_change(Change::content("/d/f", Content::Unavailable, Timestamp(10)));
        builder
    }

    #[test]
    fn visits_newest_first() {
        let mut order = Order::default();
        sample().lock().accept(&mut order).unwrap();
        assert_eq!(
            order.0,
            vec!["begin #3", "content /d/f", "/d/f", "/d", "end #3"]
        );
    }

    #[test]
    fn lock_is_idempotent() {
        let builder = sample();
        let first = builder.lock();
        let second = builder.lock();
        assert!(builder.is_locked());
        assert_eq!(first, second);
        assert_eq!(first.changes(), second.changes());
    }

    #[test]
    #[should_panic(expected = "locked change-set")]
    fn add_after_lock_panics() {
        let builder = sample();
        builder.lock();
        builder.add_change(Change::put_label("late"));
    }

    #[test]
    fn identity_is_the_id() {
        let a = ChangeSet::new(ChangeSetId(1), Some("a".into()), Timestamp(1), vec![]);
        let b = ChangeSet::new(
            ChangeSetId(1),
            None,
            Timestamp(2),
            vec![Change::put_label("x")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn derived_queries() {
        let cs = sample().lock();
        assert!(cs.affects_path("/d/f"));
        assert!(cs.is_creational_for("/d"));
        assert_eq!(cs.affected_paths(), vec!["/d".to_string(), "/d/f".to_string()]);
        assert!(!cs.is_content_change_only());
        assert!(!cs.is_label_only());

        let labels = ChangeSet::new(
            ChangeSetId(4),
            None,
            Timestamp(1),
            vec![Change::put_system_label("build", 0x00ff00)],
        );
        assert!(labels.is_label_only());
        assert_eq!(labels.label(), Some("build"));
        assert_eq!(labels.label_color(), Some(0x00ff00));
        assert_eq!(labels.display_name(), Some("build"));
    }

    #[test]
    fn renders_ron() {
        let ron = sample().lock().to_ron_pretty().unwrap();
        assert!(ron.contains("CreateDirectory"));
    }
}
