//! Append-only change log on top of sled.
//!
//! Records live in the `_records` tree under their big-endian [`RecordId`] and link backwards
//! through `prev`. The `_meta` tree holds a single [`StoreHeader`] with the format version, the
//! session stamp the log belongs to, the id counters and the tail of the chain. Content blobs
//! referenced by changes live in `_contents`.
//!
//! Storage failures never reach callers. Any read, parse or write error and any broken link
//! closes the database, wipes it and opens a fresh one:
//!
//! ```text
//! Open --(io error | cycle | bad record)--> Rebuilding --> Open
//!                                                \--(rebuild failed)--> Broken
//! ```
//!
//! A broken or closed store behaves as an empty log.

use crate::change_set::{ChangeSet, ChangeSetData};
use crate::common::{decode, encode, Cancellation, Error};
use crate::config::HistoryConfig;
use crate::consts::{
    CONTENTS_TREE, CORRUPTION_MESSAGE, CORRUPTION_TITLE, CURRENT_FORMAT, HEADER,
    IDLE_GAP_COST_MILLIS, META_TREE, RECORDS_TREE,
};
use crate::content::{Content, ContentSource};
use crate::notify::Notifier;
use chrono::Duration;
use lochist_base::{ChangeSetId, ContentId, FormatVersion, RecordId, Timestamp};
use log::{debug, error, info, trace, warn};
use rkyv::{Archive, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of the filesystem session a log describes, supplied by the environment.
#[derive(
    Archive,
    Copy,
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
pub struct SessionStamp(pub i64);

#[derive(Archive, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct StoreHeader {
    pub format: FormatVersion,
    pub session: SessionStamp,
    /// Highest change-set id handed out or written.
    pub last_id: i64,
    /// Highest record id ever allocated.
    pub last_record: u64,
    /// Newest record in the chain, 0 when the log is empty.
    pub tail: u64,
    pub last_content: u64,
}

#[derive(Archive, Clone, Debug, Serialize, Deserialize)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
struct StoredRecord {
    id: RecordId,
    /// 0 for the oldest record.
    prev: u64,
    change_set: ChangeSetData,
}

/// A change-set as read back from the log.
#[derive(Clone, Debug)]
pub struct ChangeRecord {
    pub id: RecordId,
    pub prev: Option<RecordId>,
    pub change_set: ChangeSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Created,
    Reopened,
    /// Previous log was for another format or session and was dropped.
    Discarded(String),
    /// Previous log could not be read and was rebuilt.
    Recovered(String),
}

/// Cause of the last rebuild, kept so it can be reported without touching the broken data again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptionReport {
    pub cause: String,
    pub at: Timestamp,
}

pub struct ChangeRecordStore {
    inner: Mutex<Inner>,
    notifier: Arc<dyn Notifier>,
}

struct Inner {
    config: HistoryConfig,
    session: SessionStamp,
    state: State,
    outcome: OpenOutcome,
    last_corruption: Option<CorruptionReport>,
    /// Counters mirrored in memory so ids keep growing across a rebuild.
    issued_id: i64,
    issued_content: u64,
}

enum State {
    Open(Backing),
    Broken,
    Closed,
}

/// Handles of an open database.
pub struct Backing {
    db: Db,
    meta: Tree,
    records: Tree,
    contents: Tree,
    header: StoreHeader,
}

impl StoreHeader {
    fn fresh(session: SessionStamp) -> Self {
        StoreHeader {
            format: CURRENT_FORMAT,
            session,
            last_id: 0,
            last_record: 0,
            tail: 0,
            last_content: 0,
        }
    }
}

impl From<StoredRecord> for ChangeRecord {
    fn from(record: StoredRecord) -> Self {
        ChangeRecord {
            id: record.id,
            prev: RecordId::from_link(record.prev),
            change_set: record.change_set.into(),
        }
    }
}

fn tx_error(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Sled(e),
    }
}

/// Opens the database at `config` and validates its header. Returns whether it was created.
fn open_backing(config: &HistoryConfig, session: SessionStamp) -> Result<(Backing, bool), Error> {
    let db = config.sled_config().open()?;
    let meta = db.open_tree(META_TREE)?;
    let records = db.open_tree(RECORDS_TREE)?;
    let contents = db.open_tree(CONTENTS_TREE)?;
    let (header, created) = match meta.get(HEADER)? {
        Some(bytes) => {
            let header: StoreHeader = decode(&bytes)?;
            if !CURRENT_FORMAT.can_read(&header.format) {
                return Err(Error::IncompatibleFormat {
                    stored: header.format,
                    current: CURRENT_FORMAT,
                });
            }
            if header.session != session {
                return Err(Error::StaleSession {
                    stored: header.session.0,
                    current: session.0,
                });
            }
            (header, false)
        }
        None => {
            if !records.is_empty() {
                return Err(Error::MissingHeader);
            }
            let header = StoreHeader::fresh(session);
            meta.insert(HEADER, encode(&header)?.as_slice())?;
            db.flush()?;
            (header, true)
        }
    };
    Ok((
        Backing {
            db,
            meta,
            records,
            contents,
            header,
        },
        created,
    ))
}

/// Removes whatever is stored at `config` and opens an empty store there.
///
/// The caller must have dropped its handles to the old database.
pub fn rebuild(config: &HistoryConfig, session: SessionStamp) -> Result<Backing, Error> {
    if !config.temporary && config.has_path() && config.path.exists() {
        std::fs::remove_dir_all(&config.path)?;
    }
    let (backing, _) = open_backing(config, session)?;
    info!("history store rebuilt at {:?}", config.path);
    Ok(backing)
}

impl Backing {
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    pub fn is_empty(&self) -> bool {
        self.header.tail == 0
    }

    fn write_header(&mut self, header: StoreHeader) -> Result<(), Error> {
        self.meta.insert(HEADER, encode(&header)?.as_slice())?;
        self.header = header;
        Ok(())
    }

    fn read_record(&self, id: RecordId) -> Result<Option<StoredRecord>, Error> {
        let Some(bytes) = self.records.get(id.to_bytes())? else {
            return Ok(None);
        };
        let record: StoredRecord = decode(&bytes)?;
        if record.id != id {
            return Err(Error::MisplacedRecord(id, record.id));
        }
        Ok(Some(record))
    }

    fn append(&mut self, change_set: &ChangeSet, flush: bool) -> Result<RecordId, Error> {
        let id = RecordId(self.header.last_record + 1);
        let record = StoredRecord {
            id,
            prev: self.header.tail,
            change_set: change_set.data().clone(),
        };
        let record_bytes = encode(&record)?;
        let header = StoreHeader {
            last_id: self.header.last_id.max(change_set.id().0),
            last_record: id.0,
            tail: id.0,
            ..self.header.clone()
        };
        let header_bytes = encode(&header)?;

        let result: TransactionResult<(), Error> =
            (&self.meta, &self.records).transaction(|(meta, records)| {
                records.insert(&id.to_bytes()[..], record_bytes.as_slice())?;
                meta.insert(HEADER, header_bytes.as_slice())?;
                Ok(())
            });
        result.map_err(tx_error)?;
        self.header = header;
        if flush {
            self.db.flush()?;
        }
        trace!("appended {id} for change-set {}", change_set.id());
        Ok(id)
    }

    fn read_previous(
        &self,
        from: Option<RecordId>,
        seen: &mut HashSet<RecordId>,
    ) -> Result<Option<ChangeRecord>, Error> {
        let prev = match from {
            None => RecordId::from_link(self.header.tail),
            Some(id) => {
                seen.insert(id);
                match self.read_record(id)? {
                    Some(record) => RecordId::from_link(record.prev),
                    None => {
                        debug!("{id} is no longer stored, history ends here");
                        return Ok(None);
                    }
                }
            }
        };
        let Some(prev) = prev else {
            return Ok(None);
        };
        if !seen.insert(prev) {
            return Err(Error::CyclicChain(prev));
        }
        match self.read_record(prev)? {
            Some(record) => Ok(Some(record.into())),
            None => Err(Error::DanglingLink(from.unwrap_or(RecordId::NONE), prev)),
        }
    }

    /// Newest record whose idle-adjusted age exceeds `retention`.
    fn find_first_obsolete(
        &self,
        retention: Duration,
        day_gap: Duration,
        cancel: &Cancellation,
    ) -> Result<Option<RecordId>, Error> {
        let mut age = Duration::zero();
        let mut newer: Option<Timestamp> = None;
        let mut seen = HashSet::new();
        let mut current = RecordId::from_link(self.header.tail);
        while let Some(id) = current {
            if cancel.is_cancelled() {
                debug!("purge cancelled while measuring history");
                return Ok(None);
            }
            if !seen.insert(id) {
                return Err(Error::CyclicChain(id));
            }
            let Some(record) = self.read_record(id)? else {
                return Err(Error::DanglingLink(RecordId::NONE, id));
            };
            let timestamp = record.change_set.timestamp;
            let gap = newer
                .map(|newer| newer.since(timestamp).max(Duration::zero()))
                .unwrap_or_else(Duration::zero);
            newer = Some(timestamp);
            age = age
                + if gap < day_gap {
                    gap
                } else {
                    Duration::milliseconds(IDLE_GAP_COST_MILLIS)
                };
            if age > retention {
                return Ok(Some(id));
            }
            current = RecordId::from_link(record.prev);
        }
        Ok(None)
    }

    fn purge(
        &mut self,
        retention: Duration,
        day_gap: Duration,
        cancel: &Cancellation,
        visit: &mut dyn FnMut(&ChangeSet),
    ) -> Result<usize, Error> {
        let Some(cutoff) = self.find_first_obsolete(retention, day_gap, cancel)? else {
            return Ok(0);
        };

        let mut seen = HashSet::from([cutoff]);
        let mut current = Some(cutoff);
        let mut visited = 0;
        while let Some(id) = current {
            if cancel.is_cancelled() {
                debug!("purge cancelled before deleting anything");
                return Ok(0);
            }
            let Some(record) = self.read_record(id)? else {
                return Err(Error::DanglingLink(RecordId::NONE, id));
            };
            current = RecordId::from_link(record.prev);
            if let Some(prev) = current {
                if !seen.insert(prev) {
                    return Err(Error::CyclicChain(prev));
                }
            }
            visit(&ChangeSet::from(record.change_set));
            visited += 1;
        }

        let mut obsolete = vec![];
        for key in self.records.range(..=cutoff.to_bytes()).keys() {
            obsolete.push(key?);
        }
        let survivor = match self.records.range(cutoff.next().to_bytes()..).next() {
            Some(entry) => {
                let (key, bytes) = entry?;
                let mut record: StoredRecord = decode(&bytes)?;
                if record.prev != 0 && record.prev <= cutoff.0 {
                    record.prev = 0;
                    Some((key, encode(&record)?))
                } else {
                    None
                }
            }
            None => None,
        };
        let header = StoreHeader {
            tail: if self.header.tail <= cutoff.0 {
                0
            } else {
                self.header.tail
            },
            ..self.header.clone()
        };
        let header_bytes = encode(&header)?;

        let result: TransactionResult<(), Error> =
            (&self.meta, &self.records).transaction(|(meta, records)| {
                for key in &obsolete {
                    records.remove(key.clone())?;
                }
                if let Some((key, bytes)) = &survivor {
                    records.insert(key.clone(), bytes.as_slice())?;
                }
                meta.insert(HEADER, header_bytes.as_slice())?;
                Ok::<(), ConflictableTransactionError<Error>>(())
            });
        result.map_err(tx_error)?;
        self.header = header;
        self.db.flush()?;
        debug!(
            "purged {} records up to {cutoff}, {visited} change-sets visited",
            obsolete.len()
        );
        Ok(obsolete.len())
    }

    fn store_content(&mut self, bytes: &[u8]) -> Result<ContentId, Error> {
        let id = ContentId(self.header.last_content + 1);
        self.contents.insert(id.to_bytes(), bytes)?;
        let header = StoreHeader {
            last_content: id.0,
            ..self.header.clone()
        };
        self.write_header(header)?;
        Ok(id)
    }
}

impl ChangeRecordStore {
    /// Opens the log at `config`, dropping it when it was written by another format or for
    /// another session, and rebuilding it when it cannot be read.
    ///
    /// Fails only when `config` is invalid, when the database cannot be opened at all (for
    /// example it is locked by another process) or when a fresh one cannot be created.
    pub fn open(
        config: HistoryConfig,
        session: SessionStamp,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let mut last_corruption = None;
        let (backing, outcome) = match open_backing(&config, session) {
            Ok((backing, true)) => {
                info!("created history store at {:?}", config.path);
                (backing, OpenOutcome::Created)
            }
            Ok((backing, false)) => {
                debug!(
                    "reopened history store at {:?}, tail {}",
                    config.path, backing.header.tail
                );
                (backing, OpenOutcome::Reopened)
            }
            Err(e @ (Error::IncompatibleFormat { .. } | Error::StaleSession { .. })) => {
                info!("discarding history store: {e}");
                (rebuild(&config, session)?, OpenOutcome::Discarded(e.to_string()))
            }
            Err(e @ (Error::Sled(sled::Error::Io(_)) | Error::Io(_))) => return Err(e),
            Err(e) => {
                error!("history store is unreadable: {e}");
                let backing = rebuild(&config, session)?;
                notifier.notify(CORRUPTION_TITLE, &format!("{CORRUPTION_MESSAGE}: {e}"));
                last_corruption = Some(CorruptionReport {
                    cause: e.to_string(),
                    at: Timestamp::now(),
                });
                (backing, OpenOutcome::Recovered(e.to_string()))
            }
        };
        let issued_id = backing.header.last_id;
        let issued_content = backing.header.last_content;
        Ok(ChangeRecordStore {
            inner: Mutex::new(Inner {
                config,
                session,
                state: State::Open(backing),
                outcome,
                last_corruption,
                issued_id,
                issued_content,
            }),
            notifier,
        })
    }

    /// Session stamp of an existing store, without validating or modifying it.
    pub fn stored_session(config: &HistoryConfig) -> Result<Option<SessionStamp>, Error> {
        if !config.has_path() || !config.path.exists() {
            return Ok(None);
        }
        let db = config.sled_config().open()?;
        let meta = db.open_tree(META_TREE)?;
        match meta.get(HEADER)? {
            Some(bytes) => Ok(Some(decode::<StoreHeader>(&bytes)?.session)),
            None => Ok(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `op` on the open database. Errors rebuild the store and yield `default`.
    fn with_backing<T>(
        &self,
        default: T,
        op: impl FnOnce(&mut Backing) -> Result<T, Error>,
    ) -> T {
        let mut inner = self.lock();
        let result = match &mut inner.state {
            State::Open(backing) => op(backing),
            State::Broken | State::Closed => return default,
        };
        match result {
            Ok(value) => value,
            Err(e) => {
                self.recover(&mut inner, e);
                default
            }
        }
    }

    fn recover(&self, inner: &mut Inner, cause: Error) {
        error!("history storage failure, rebuilding: {cause}");
        inner.state = State::Broken;
        match rebuild(&inner.config, inner.session) {
            Ok(mut backing) => {
                let header = StoreHeader {
                    last_id: inner.issued_id,
                    last_content: inner.issued_content,
                    ..backing.header.clone()
                };
                if let Err(e) = backing.write_header(header) {
                    warn!("rebuilt history store lost its id counters: {e}");
                }
                inner.state = State::Open(backing);
            }
            Err(e) => error!("history store could not be rebuilt, history is disabled: {e}"),
        }
        inner.last_corruption = Some(CorruptionReport {
            cause: cause.to_string(),
            at: Timestamp::now(),
        });
        self.notifier
            .notify(CORRUPTION_TITLE, &format!("{CORRUPTION_MESSAGE}: {cause}"));
    }

    pub fn open_outcome(&self) -> OpenOutcome {
        self.lock().outcome.clone()
    }

    pub fn last_corruption(&self) -> Option<CorruptionReport> {
        self.lock().last_corruption.clone()
    }

    pub fn header(&self) -> Option<StoreHeader> {
        match &self.lock().state {
            State::Open(backing) => Some(backing.header.clone()),
            State::Broken | State::Closed => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.lock().state {
            State::Open(backing) => backing.is_empty(),
            State::Broken | State::Closed => true,
        }
    }

    /// Strictly increasing, also across reopen and rebuild.
    pub fn next_id(&self) -> ChangeSetId {
        let mut inner = self.lock();
        let id = match &inner.state {
            State::Open(backing) => backing.header.last_id.max(inner.issued_id) + 1,
            State::Broken | State::Closed => inner.issued_id + 1,
        };
        inner.issued_id = id;
        let result = match &mut inner.state {
            State::Open(backing) => {
                let header = StoreHeader {
                    last_id: id,
                    ..backing.header.clone()
                };
                backing.write_header(header)
            }
            State::Broken | State::Closed => Ok(()),
        };
        if let Err(e) = result {
            self.recover(&mut inner, e);
        }
        ChangeSetId(id)
    }

    /// Writes `change_set` as the newest record. None if it could not be written, in which case
    /// the store has been rebuilt.
    pub fn append(&self, change_set: &ChangeSet) -> Option<RecordId> {
        let mut inner = self.lock();
        inner.issued_id = inner.issued_id.max(change_set.id().0);
        let flush = inner.config.flush_every_append;
        let result = match &mut inner.state {
            State::Open(backing) => backing.append(change_set, flush),
            State::Broken | State::Closed => return None,
        };
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                self.recover(&mut inner, e);
                None
            }
        }
    }

    /// Record preceding `from`, or the newest record when `from` is None.
    ///
    /// `seen` collects every id visited by a walk; meeting one again means the chain loops and
    /// the store is rebuilt. A `from` that is no longer stored ends the walk quietly.
    pub fn read_previous(
        &self,
        from: Option<RecordId>,
        seen: &mut HashSet<RecordId>,
    ) -> Option<ChangeRecord> {
        self.with_backing(None, |backing| backing.read_previous(from, seen))
    }

    /// Drops every change-set beyond `retention` of active time, see [`HistoryConfig`].
    ///
    /// `visit` sees each dropped change-set, newest first, before anything is deleted. Returns
    /// the number of records removed, 0 when nothing was obsolete or `cancel` fired.
    pub fn purge(
        &self,
        retention: Duration,
        day_gap: Duration,
        cancel: &Cancellation,
        mut visit: impl FnMut(&ChangeSet),
    ) -> usize {
        self.with_backing(0, |backing| {
            backing.purge(retention, day_gap, cancel, &mut visit)
        })
    }

    pub fn store_content(&self, bytes: &[u8]) -> Content {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let result = match &mut inner.state {
            State::Open(backing) => {
                let mut header = backing.header.clone();
                header.last_content = header.last_content.max(inner.issued_content);
                backing.header = header;
                backing.store_content(bytes)
            }
            State::Broken | State::Closed => return Content::Unavailable,
        };
        match result {
            Ok(id) => {
                inner.issued_content = id.0;
                Content::Stored(id)
            }
            Err(e) => {
                self.recover(inner, e);
                Content::Unavailable
            }
        }
    }

    pub fn load_content(&self, id: ContentId) -> Option<Vec<u8>> {
        self.with_backing(None, |backing| {
            Ok(backing.contents.get(id.to_bytes())?.map(|bytes| bytes.to_vec()))
        })
    }

    pub fn remove_contents(&self, ids: &[ContentId]) {
        if ids.is_empty() {
            return;
        }
        self.with_backing((), |backing| {
            let mut batch = sled::Batch::default();
            for id in ids {
                batch.remove(&id.to_bytes()[..]);
            }
            backing.contents.apply_batch(batch)?;
            trace!("released {} content blobs", ids.len());
            Ok(())
        })
    }

    pub fn flush(&self) {
        self.with_backing((), |backing| {
            backing.db.flush()?;
            Ok(())
        })
    }

    /// Flushes and closes. A closed store reads as empty and ignores writes.
    pub fn close(&self) {
        self.flush();
        self.lock().state = State::Closed;
    }

    #[cfg(test)]
    pub(crate) fn overwrite_record(&self, id: RecordId, bytes: &[u8]) {
        self.with_raw_backing(|backing| backing.records.insert(id.to_bytes(), bytes))
            .expect("store is open")
            .expect("record written");
    }

    #[cfg(test)]
    pub(crate) fn with_raw_backing<T>(&self, f: impl FnOnce(&mut Backing) -> T) -> Option<T> {
        match &mut self.lock().state {
            State::Open(backing) => Some(f(backing)),
            State::Broken | State::Closed => None,
        }
    }
}

impl ContentSource for ChangeRecordStore {
    fn load(&self, content: &Content) -> Option<Vec<u8>> {
        content.id().and_then(|id| self.load_content(id))
    }
}

impl Drop for ChangeRecordStore {
    fn drop(&mut self) {
        if let State::Open(backing) = &self.lock().state {
            if let Err(e) = backing.db.flush() {
                warn!("history store flush on close failed: {e}");
            }
        }
    }
}
