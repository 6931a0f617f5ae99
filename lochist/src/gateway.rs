use lochist_base::Timestamp;
use std::io;

/// Entry present in the live tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveEntry {
    pub path: String,
    pub is_directory: bool,
    pub timestamp: Timestamp,
}

/// The filesystem history is kept for. Paths are absolute and `/` separated.
pub trait FileSystemGateway {
    fn find_live_entry(&self, path: &str) -> io::Result<Option<LiveEntry>>;

    /// Returns the existing entry or creates it together with missing parent directories.
    fn find_or_create(&mut self, path: &str, is_directory: bool) -> io::Result<LiveEntry>;

    /// Removes the entry and everything below it.
    fn delete(&mut self, path: &str) -> io::Result<()>;

    /// Renames within the same parent.
    fn rename(&mut self, path: &str, new_name: &str) -> io::Result<LiveEntry>;

    fn set_content(&mut self, path: &str, bytes: &[u8], timestamp: Timestamp) -> io::Result<()>;

    fn content(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    /// Direct children, sorted by path.
    fn children(&self, path: &str) -> io::Result<Vec<LiveEntry>>;
}

pub(crate) fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} does not exist"))
}

pub(crate) fn already_exists(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, format!("{path} already exists"))
}
