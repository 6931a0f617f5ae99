pub mod change;
pub mod change_set;
mod common;
pub mod config;
mod consts;
pub mod content;
pub mod difference;
pub mod gateway;
pub mod history;
pub mod memory_fs;
pub mod notify;
mod recording;
pub mod revert;
pub mod revision;
pub mod store;

pub use change::{
    Change, ChangeVisitor, ContentChange, DeletedEntry, PutLabelChange, PutSystemLabelChange,
    StopVisiting, StructuralChange, StructuralKind,
};
pub use change_set::{ChangeSet, ChangeSetBuilder, ChangeSetData};
pub use common::{Cancellation, Error};
pub use config::HistoryConfig;
pub use consts::CURRENT_FORMAT;
pub use content::{Content, ContentSource};
pub use difference::{Difference, DifferenceReverter, Entry};
pub use gateway::{FileSystemGateway, LiveEntry};
pub use history::{ChangeSetListener, ChangeSets, ListenerId, LocalHistory};
pub use memory_fs::MemoryFs;
pub use notify::{LogNotifier, Notifier, QueuedNotifier};
pub use recording::RecordingGateway;
pub use revert::{ChangeRange, RevertError};
pub use revision::{
    ChangeRevision, CurrentRevision, NameFilter, Revision, RevisionEntry, RevisionsCollector,
};
pub use store::{
    rebuild, Backing, ChangeRecord, ChangeRecordStore, CorruptionReport, OpenOutcome, SessionStamp,
    StoreHeader,
};

pub use lochist_base::{path, ChangeSetId, ContentId, FormatVersion, RecordId, Timestamp};
