pub mod format_version;
pub mod ids;
pub mod path;
pub mod timestamp;

pub use format_version::FormatVersion;
pub use ids::{ChangeSetId, ContentId, RecordId};
pub use path::PathError;
pub use timestamp::Timestamp;
