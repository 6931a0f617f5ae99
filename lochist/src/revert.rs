use crate::change::{ChangeVisitor, ContentChange, DeletedEntry, StructuralChange, StructuralKind};
use crate::change_set::ChangeSet;
use crate::common::Cancellation;
use crate::content::{Content, ContentSource};
use crate::gateway::FileSystemGateway;
use crate::history::{ChangeSetListener, LocalHistory};
use lochist_base::{path, ChangeSetId, Timestamp};
use log::{debug, trace};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::io;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevertError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("revert cancelled")]
    Cancelled,
}

/// Inclusive span of change-set ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChangeRange {
    pub from: ChangeSetId,
    pub to: ChangeSetId,
}

impl Display for ChangeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}..{}", self.from, self.to)
        }
    }
}

/// Remembers the first and last change-set written while installed.
#[derive(Clone, Default)]
struct RangeRecorder(Arc<Mutex<Option<ChangeRange>>>);

impl ChangeSetListener for RangeRecorder {
    fn change_set_finished(&mut self, change_set: &ChangeSet) {
        let mut range = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let id = change_set.id();
        *range = Some(match *range {
            Some(range) => ChangeRange {
                from: range.from.min(id),
                to: range.to.max(id),
            },
            None => ChangeRange::single(id),
        });
    }
}

impl RangeRecorder {
    fn range(&self) -> Option<ChangeRange> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChangeRange {
    pub fn new(from: ChangeSetId, to: ChangeSetId) -> Self {
        ChangeRange {
            from: from.min(to),
            to: from.max(to),
        }
    }

    pub fn single(id: ChangeSetId) -> Self {
        ChangeRange { from: id, to: id }
    }

    pub fn contains(&self, id: ChangeSetId) -> bool {
        self.from <= id && id <= self.to
    }

    /// Undoes every change-set of the range against `gateway`, newest first.
    ///
    /// The inverse operations are recorded as one new change-set, whose range is returned so
    /// that the revert itself can be reverted. Nothing applied before a failure or cancellation
    /// is rolled back.
    pub fn revert<G: FileSystemGateway + ?Sized>(
        &self,
        history: &LocalHistory,
        gateway: &mut G,
        cancel: &Cancellation,
    ) -> Result<ChangeRange, RevertError> {
        let recorder = RangeRecorder::default();
        let listener = history.add_listener(Box::new(recorder.clone()));

        let span = history.change_sets_between(self.from, self.to);
        debug!("reverting {self}, {} change-sets", span.len());
        history.begin_change_set();
        let applied = {
            let mut tracked = history.tracked(gateway);
            let mut applier = InverseApplier::new(&mut tracked, history).cancelled_by(cancel);
            span.iter().try_for_each(|cs| cs.accept(&mut applier))
        };
        history.end_change_set(Some(&format!("Revert {self}")));
        history.remove_listener(listener);

        applied?;
        Ok(recorder.range().unwrap_or(*self))
    }
}

/// Applies the inverse of every visited change.
///
/// A strict applier stops at the first gateway failure. A lenient one, used to replay history
/// on a scratch tree, skips what cannot be applied and remembers which files lost their content.
pub(crate) struct InverseApplier<'a, G: FileSystemGateway + ?Sized> {
    gateway: &'a mut G,
    contents: &'a dyn ContentSource,
    cancel: Option<&'a Cancellation>,
    lenient: bool,
    unavailable: HashSet<String>,
}

impl<'a, G: FileSystemGateway + ?Sized> InverseApplier<'a, G> {
    pub(crate) fn new(gateway: &'a mut G, contents: &'a dyn ContentSource) -> Self {
        InverseApplier {
            gateway,
            contents,
            cancel: None,
            lenient: false,
            unavailable: HashSet::new(),
        }
    }

    pub(crate) fn cancelled_by(mut self, cancel: &'a Cancellation) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Starts with files whose content is already known to be missing.
    pub(crate) fn with_unavailable(mut self, unavailable: HashSet<String>) -> Self {
        self.unavailable = unavailable;
        self
    }

    /// Files whose content at the replayed point in time is not known.
    pub(crate) fn into_unavailable(self) -> HashSet<String> {
        self.unavailable
    }

    fn check_cancelled(&self) -> Result<(), RevertError> {
        match self.cancel {
            Some(cancel) if cancel.is_cancelled() => Err(RevertError::Cancelled),
            _ => Ok(()),
        }
    }

    fn tolerate(&self, result: io::Result<()>) -> Result<(), RevertError> {
        match result {
            Err(e) if self.lenient => {
                trace!("replay skipped a step: {e}");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn delete_if_present(&mut self, p: &str) -> io::Result<()> {
        if self.gateway.find_live_entry(p)?.is_some() {
            self.gateway.delete(p)?;
        }
        self.unavailable.retain(|u| !path::is_ancestor_or_self(p, u));
        Ok(())
    }

    fn recreate(&mut self, p: &str, entry: &DeletedEntry) -> io::Result<()> {
        self.gateway.find_or_create(p, entry.is_directory)?;
        if !entry.is_directory {
            self.restore(p, &entry.content, entry.timestamp)?;
        }
        Ok(())
    }

    fn restore(&mut self, p: &str, content: &Content, timestamp: Timestamp) -> io::Result<()> {
        match self.contents.load(content) {
            Some(bytes) => {
                self.gateway.set_content(p, &bytes, timestamp)?;
                self.unavailable.remove(p);
            }
            None => {
                debug!("content of {p} is not available, left as is");
                self.unavailable.insert(p.to_string());
            }
        }
        Ok(())
    }

    fn undo_structural(&mut self, change: &StructuralChange) -> Result<(), RevertError> {
        match &change.kind {
            StructuralKind::CreateFile { .. } | StructuralKind::CreateDirectory => {
                self.check_cancelled()?;
                let result = self.delete_if_present(&change.path);
                self.tolerate(result)
            }
            StructuralKind::Delete { entries } => {
                for entry in entries {
                    self.check_cancelled()?;
                    let full = path::join(&change.path, &entry.relative_path);
                    let result = self.recreate(&full, entry);
                    self.tolerate(result)?;
                }
                Ok(())
            }
            StructuralKind::Rename { old_name } => {
                self.check_cancelled()?;
                let old_path = change.old_path();
                let result = self.rename_back(&change.path, &old_path, old_name);
                self.tolerate(result)
            }
        }
    }

    fn rename_back(&mut self, current: &str, old_path: &str, old_name: &str) -> io::Result<()> {
        if self.gateway.find_live_entry(current)?.is_none() {
            debug!("{current} is gone, cannot rename it back to {old_name}");
            return Ok(());
        }
        if self.gateway.find_live_entry(old_path)?.is_some() {
            self.gateway.delete(old_path)?;
        }
        self.gateway.rename(current, old_name)?;
        let moved: Vec<String> = self
            .unavailable
            .iter()
            .filter(|u| path::is_ancestor_or_self(current, u))
            .cloned()
            .collect();
        for p in moved {
            self.unavailable.remove(&p);
            if let Some(rebased) = path::rebase(&p, current, old_path) {
                self.unavailable.insert(rebased);
            }
        }
        Ok(())
    }

    fn undo_content(&mut self, change: &ContentChange) -> Result<(), RevertError> {
        self.check_cancelled()?;
        let result = match self.gateway.find_live_entry(&change.path) {
            Ok(Some(entry)) if !entry.is_directory => {
                self.restore(&change.path, &change.old_content, change.old_timestamp)
            }
            Ok(_) => {
                debug!("{} is not a file anymore, content not restored", change.path);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.tolerate(result)
    }
}

impl<'a, G: FileSystemGateway + ?Sized> ChangeVisitor for InverseApplier<'a, G> {
    type Error = RevertError;

    fn visit_structural(&mut self, change: &StructuralChange) -> Result<(), RevertError> {
        self.undo_structural(change)
    }

    fn visit_content(&mut self, change: &ContentChange) -> Result<(), RevertError> {
        self.undo_content(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_fs::MemoryFs;
    use crate::store::SessionStamp;

    #[test]
    fn display() {
        assert_eq!(ChangeRange::new(ChangeSetId(3), ChangeSetId(1)).to_string(), "#1..#3");
        assert_eq!(ChangeRange::single(ChangeSetId(2)).to_string(), "#2");
        assert!(ChangeRange::new(ChangeSetId(1), ChangeSetId(3)).contains(ChangeSetId(2)));
    }

    #[test]
    fn cancelled_revert_stops_before_mutating() {
        let history = LocalHistory::temporary(SessionStamp(1)).unwrap();
        let mut fs = MemoryFs::new();
        let created = {
            history.begin_change_set();
            history.tracked(&mut fs).write("/a", b"a", Timestamp(1)).unwrap();
            history.end_change_set(None).unwrap()
        };
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = ChangeRange::single(created.id()).revert(&history, &mut fs, &cancel);
        assert!(matches!(result, Err(RevertError::Cancelled)));
        assert!(fs.exists("/a"));
    }

    #[test]
    fn lenient_replay_tracks_missing_content() {
        use crate::change::Change;

        let history = LocalHistory::temporary(SessionStamp(1)).unwrap();
        let mut fs = MemoryFs::new();
        fs.write("/f", b"new").unwrap();
        let change_set = ChangeSet::new(
            ChangeSetId(1),
            None,
            Timestamp(1),
            vec![
                Change::content("/f", Content::Unavailable, Timestamp(1)),
                Change::rename("/g", "missing"),
            ],
        );
        let mut applier = InverseApplier::new(&mut fs, &history).lenient();
        change_set.accept(&mut applier).unwrap();
        assert!(applier.into_unavailable().contains("/f"));
    }
}
