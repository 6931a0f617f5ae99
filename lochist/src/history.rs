use crate::change::{Change, ChangeVisitor};
use crate::change_set::{ChangeSet, ChangeSetBuilder};
use crate::common::{Cancellation, Error};
use crate::config::HistoryConfig;
use crate::content::{Content, ContentSource};
use crate::gateway::FileSystemGateway;
use crate::notify::{LogNotifier, Notifier};
use crate::recording::RecordingGateway;
use crate::store::{ChangeRecordStore, CorruptionReport, OpenOutcome, SessionStamp};
use chrono::Duration;
use dyn_clone::DynClone;
use lochist_base::{ChangeSetId, ContentId, RecordId, Timestamp};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Observer of change-sets entering the history.
///
/// The registry is cloned before dispatch and callbacks run without any history lock held, so a
/// listener may read the history. State that must outlive a callback belongs behind a shared
/// handle.
pub trait ChangeSetListener: DynClone + Send {
    fn change_set_started(&mut self, _id: ChangeSetId) {}

    fn change_set_finished(&mut self, change_set: &ChangeSet);
}

dyn_clone::clone_trait_object!(ChangeSetListener);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Entry point of the engine: the log, the change-set being recorded and its listeners.
pub struct LocalHistory {
    store: ChangeRecordStore,
    config: HistoryConfig,
    current: Mutex<Current>,
    listeners: Mutex<Vec<(ListenerId, Box<dyn ChangeSetListener>)>>,
    next_listener: AtomicU64,
}

#[derive(Default)]
struct Current {
    depth: usize,
    builder: Option<ChangeSetBuilder>,
}

impl LocalHistory {
    pub fn open(
        config: HistoryConfig,
        session: SessionStamp,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Error> {
        let store = ChangeRecordStore::open(config.clone(), session, notifier)?;
        Ok(LocalHistory {
            store,
            config,
            current: Mutex::new(Current::default()),
            listeners: Mutex::new(vec![]),
            next_listener: AtomicU64::new(1),
        })
    }

    /// Throwaway history reporting corruption to the log.
    pub fn temporary(session: SessionStamp) -> Result<Self, Error> {
        Self::open(
            HistoryConfig::temporary(),
            session,
            Arc::new(LogNotifier),
        )
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn store(&self) -> &ChangeRecordStore {
        &self.store
    }

    pub fn open_outcome(&self) -> OpenOutcome {
        self.store.open_outcome()
    }

    pub fn last_corruption(&self) -> Option<CorruptionReport> {
        self.store.last_corruption()
    }

    fn current(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> Vec<Box<dyn ChangeSetListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Opens a change-set, or nests into the one already open.
    pub fn begin_change_set(&self) {
        let started = {
            let mut current = self.current();
            current.depth += 1;
            if current.builder.is_some() {
                None
            } else {
                let builder = ChangeSetBuilder::new(self.store.next_id(), Timestamp::now());
                let id = builder.id();
                current.builder = Some(builder);
                Some(id)
            }
        };
        if let Some(id) = started {
            trace!("change-set {id} started");
            for mut listener in self.listeners() {
                listener.change_set_started(id);
            }
        }
    }

    /// Closes one nesting level. The outermost call locks and writes the set unless it is empty.
    ///
    /// A `name` given at any level names the set, outer levels overriding inner ones.
    pub fn end_change_set(&self, name: Option<&str>) -> Option<ChangeSet> {
        let builder = {
            let mut current = self.current();
            if current.depth == 0 {
                warn!("end_change_set without a matching begin");
                return None;
            }
            if let (Some(name), Some(builder)) = (name, &current.builder) {
                builder.set_name(Some(name.to_string()));
            }
            current.depth -= 1;
            if current.depth > 0 {
                return None;
            }
            current.builder.take()?
        };

        let change_set = builder.lock();
        if change_set.is_empty() {
            trace!("change-set {} is empty, dropped", change_set.id());
            return None;
        }
        self.store.append(&change_set);
        for mut listener in self.listeners() {
            listener.change_set_finished(&change_set);
        }
        Some(change_set)
    }

    pub fn is_change_set_open(&self) -> bool {
        self.current().builder.is_some()
    }

    /// Records into the open change-set, or into a change-set of its own if none is open.
    pub fn add_change(&self, change: Change) {
        self.begin_change_set();
        if let Some(builder) = &self.current().builder {
            builder.add_change(change);
        }
        self.end_change_set(None);
    }

    pub fn put_user_label(&self, name: &str) -> Option<ChangeSet> {
        self.put_label(Change::put_label(name), name)
    }

    pub fn put_system_label(&self, name: &str, color: u32) -> Option<ChangeSet> {
        self.put_label(Change::put_system_label(name, color), name)
    }

    fn put_label(&self, change: Change, name: &str) -> Option<ChangeSet> {
        debug!("label {name:?}");
        self.begin_change_set();
        self.add_change(change);
        self.end_change_set(None)
    }

    /// Every change-set newest first, starting with the one still open.
    pub fn change_sets(&self) -> ChangeSets<'_> {
        let open = self
            .current()
            .builder
            .as_ref()
            .map(ChangeSetBuilder::snapshot)
            .filter(|snapshot| !snapshot.is_empty());
        ChangeSets {
            history: self,
            open,
            from: None,
            seen: HashSet::new(),
            done: false,
        }
    }

    /// Drives `visitor` over every change-set, newest first. An error from the visitor stops
    /// the traversal and is returned.
    pub fn accept<V: ChangeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), V::Error> {
        for change_set in self.change_sets() {
            change_set.accept(visitor)?;
        }
        Ok(())
    }

    pub fn find_change_set(&self, id: ChangeSetId) -> Option<ChangeSet> {
        self.change_sets()
            .skip_while(|cs| cs.id() > id)
            .take_while(|cs| cs.id() >= id)
            .find(|cs| cs.id() == id)
    }

    /// Change-sets with ids in `from..=to`, newest first.
    pub fn change_sets_between(&self, from: ChangeSetId, to: ChangeSetId) -> Vec<ChangeSet> {
        self.change_sets()
            .skip_while(|cs| cs.id() > to)
            .take_while(|cs| cs.id() >= from)
            .collect()
    }

    pub fn add_listener(&self, listener: Box<dyn ChangeSetListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn store_content(&self, bytes: &[u8]) -> Content {
        self.store.store_content(bytes)
    }

    /// Purges with the configured retention, see [`LocalHistory::purge`].
    pub fn purge_obsolete(&self, cancel: &Cancellation) -> usize {
        self.purge(self.config.retention(), self.config.day_gap(), cancel)
    }

    /// Drops change-sets beyond `retention` of active time and the content only they refer to.
    pub fn purge(&self, retention: Duration, day_gap: Duration, cancel: &Cancellation) -> usize {
        let mut contents: Vec<ContentId> = vec![];
        let purged = self.store.purge(retention, day_gap, cancel, |change_set| {
            contents.extend(change_set.contents_to_purge());
        });
        if purged > 0 {
            self.store.remove_contents(&contents);
            debug!(
                "purged {purged} change-sets and {} content blobs",
                contents.len()
            );
        }
        purged
    }

    /// Wraps `gateway` so that every mutation made through it is recorded.
    pub fn tracked<'a, G: FileSystemGateway + ?Sized>(
        &'a self,
        gateway: &'a mut G,
    ) -> RecordingGateway<'a, G> {
        RecordingGateway::new(self, gateway)
    }

    /// Writes the open change-set, if any, and closes the store.
    pub fn close(&self) {
        let open = {
            let mut current = self.current();
            current.depth = 0;
            current.builder.take()
        };
        if let Some(builder) = open {
            let change_set = builder.lock();
            if !change_set.is_empty() {
                self.store.append(&change_set);
            }
        }
        self.store.close();
    }
}

impl ContentSource for LocalHistory {
    fn load(&self, content: &Content) -> Option<Vec<u8>> {
        self.store.load(content)
    }
}

/// Newest first walk over a [`LocalHistory`], see [`LocalHistory::change_sets`].
///
/// Ends quietly when the store is rebuilt under it.
pub struct ChangeSets<'a> {
    history: &'a LocalHistory,
    open: Option<ChangeSet>,
    from: Option<RecordId>,
    seen: HashSet<RecordId>,
    done: bool,
}

impl<'a> Iterator for ChangeSets<'a> {
    type Item = ChangeSet;

    fn next(&mut self) -> Option<ChangeSet> {
        if let Some(open) = self.open.take() {
            return Some(open);
        }
        if self.done {
            return None;
        }
        match self.history.store.read_previous(self.from, &mut self.seen) {
            Some(record) => {
                self.from = Some(record.id);
                Some(record.change_set)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<String>>>);

    impl ChangeSetListener for Seen {
        fn change_set_started(&mut self, id: ChangeSetId) {
            self.0.lock().unwrap().push(format!("start {id}"));
        }

        fn change_set_finished(&mut self, change_set: &ChangeSet) {
            self.0.lock().unwrap().push(format!("finish {}", change_set.id()));
        }
    }

    fn history() -> LocalHistory {
        LocalHistory::temporary(SessionStamp(1)).unwrap()
    }

    #[test]
    fn nested_change_sets_write_once() {
        let history = history();
        let seen = Seen::default();
        history.add_listener(Box::new(seen.clone()));

        history.begin_change_set();
        history.add_change(Change::create_directory("/d"));
        history.begin_change_set();
        history.add_change(Change::create_file("/d/f", Timestamp(1)));
        assert!(history.end_change_set(Some("inner")).is_none());
        let written = history.end_change_set(Some("outer")).unwrap();

        assert_eq!(written.name(), Some("outer"));
        assert_eq!(written.changes().len(), 2);
        let all: Vec<_> = history.change_sets().collect();
        assert_eq!(all, vec![written.clone()]);
        assert_eq!(
            *seen.0.lock().unwrap(),
            vec![format!("start {}", written.id()), format!("finish {}", written.id())]
        );
    }

    #[test]
    fn open_change_set_is_listed_first() {
        let history = history();
        history.add_change(Change::create_file("/a", Timestamp(1)));
        history.begin_change_set();
        history.add_change(Change::create_file("/b", Timestamp(2)));
        let paths: Vec<_> = history
            .change_sets()
            .map(|cs| cs.affected_paths())
            .collect();
        assert_eq!(paths, vec![vec!["/b".to_string()], vec!["/a".to_string()]]);
        history.end_change_set(None);
    }

    #[test]
    fn empty_change_sets_are_dropped() {
        let history = history();
        history.begin_change_set();
        assert!(history.end_change_set(Some("nothing")).is_none());
        assert_eq!(history.change_sets().count(), 0);
    }

    #[test]
    fn removed_listener_is_silent() {
        let history = history();
        let seen = Seen::default();
        let id = history.add_listener(Box::new(seen.clone()));
        history.remove_listener(id);
        history.put_user_label("v1");
        assert!(seen.0.lock().unwrap().is_empty());
    }

    #[test]
    fn labels_and_ranges() {
        let history = history();
        history.add_change(Change::create_file("/a", Timestamp(1)));
        let label = history.put_system_label("build", 0xff0000).unwrap();
        history.add_change(Change::create_file("/b", Timestamp(2)));

        assert!(label.is_label_only());
        assert_eq!(history.find_change_set(label.id()), Some(label.clone()));
        let ids: Vec<_> = history.change_sets().map(|cs| cs.id()).collect();
        let between = history.change_sets_between(ids[2], ids[1]);
        assert_eq!(between.len(), 2);
        assert_eq!(between[0].id(), ids[1]);
    }

    #[test]
    fn visitor_errors_stop_traversal() {
        use crate::change::{StopVisiting, StructuralChange};

        struct FirstPath(Option<String>);
        impl ChangeVisitor for FirstPath {
            type Error = StopVisiting;

            fn visit_structural(&mut self, change: &StructuralChange) -> Result<(), StopVisiting> {
                self.0 = Some(change.path.clone());
                Err(StopVisiting)
            }
        }

        let history = history();
        history.add_change(Change::create_file("/old", Timestamp(1)));
        history.add_change(Change::create_file("/new", Timestamp(2)));
        let mut visitor = FirstPath(None);
        assert_eq!(history.accept(&mut visitor), Err(StopVisiting));
        assert_eq!(visitor.0.as_deref(), Some("/new"));
    }
}
