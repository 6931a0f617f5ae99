use lochist_base::FormatVersion;

pub const HEADER: &[u8] = b"_header";

pub const META_TREE: &str = "_meta";
pub const RECORDS_TREE: &str = "_records";
pub const CONTENTS_TREE: &str = "_contents";

pub const CURRENT_FORMAT: FormatVersion = FormatVersion::new(1, 0);

pub const DEFAULT_RETENTION_DAYS: i64 = 5;
/// Gaps between change-sets longer than this are idle time.
pub const DEFAULT_DAY_GAP_HOURS: i64 = 12;
/// What an idle gap adds to the retained age.
pub const IDLE_GAP_COST_MILLIS: i64 = 1;

pub const CORRUPTION_TITLE: &str = "Local history";
pub const CORRUPTION_MESSAGE: &str = "history storage corrupted and was rebuilt";
