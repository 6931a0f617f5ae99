use crate::gateway::{already_exists, not_found, FileSystemGateway, LiveEntry};
use lochist_base::{path, Timestamp};
use std::collections::BTreeMap;
use std::io;

/// Filesystem kept in memory. Used to replay history and as a live tree for embedders that do
/// not have a real one.
///
/// Entries created without an explicit timestamp get one from a logical clock that only moves
/// forward.
#[derive(Clone, Debug)]
pub struct MemoryFs {
    nodes: BTreeMap<String, Node>,
    clock: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Node {
    is_directory: bool,
    timestamp: Timestamp,
    content: Vec<u8>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        MemoryFs::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            path::ROOT.to_string(),
            Node {
                is_directory: true,
                timestamp: Timestamp(0),
                content: vec![],
            },
        );
        MemoryFs { nodes, clock: 0 }
    }

    /// Copies the whole tree visible through `gateway`.
    pub fn capture(gateway: &dyn FileSystemGateway) -> io::Result<Self> {
        let mut fs = MemoryFs::new();
        let mut pending = vec![path::ROOT.to_string()];
        while let Some(dir) = pending.pop() {
            for entry in gateway.children(&dir)? {
                let content = if entry.is_directory {
                    vec![]
                } else {
                    gateway.content(&entry.path)?.unwrap_or_default()
                };
                fs.clock = fs.clock.max(entry.timestamp.0);
                fs.nodes.insert(
                    entry.path.clone(),
                    Node {
                        is_directory: entry.is_directory,
                        timestamp: entry.timestamp,
                        content,
                    },
                );
                if entry.is_directory {
                    pending.push(entry.path);
                }
            }
        }
        Ok(fs)
    }

    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp(self.clock)
    }

    fn entry(path: &str, node: &Node) -> LiveEntry {
        LiveEntry {
            path: path.to_string(),
            is_directory: node.is_directory,
            timestamp: node.timestamp,
        }
    }

    /// Creates or overwrites a file, creating parent directories.
    pub fn write(&mut self, path: &str, bytes: &[u8]) -> io::Result<LiveEntry> {
        let entry = self.find_or_create(path, false)?;
        let timestamp = self.tick();
        self.set_content(&entry.path, bytes, timestamp)?;
        self.find_live_entry(&entry.path)?
            .ok_or_else(|| not_found(&entry.path))
    }

    pub fn mkdir(&mut self, path: &str) -> io::Result<LiveEntry> {
        self.find_or_create(path, true)
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.nodes
            .get(&path::normalize(path))
            .filter(|node| !node.is_directory)
            .map(|node| node.content.as_slice())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&path::normalize(path))
    }

    /// Every path except the root, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|p| !path::is_root(p))
            .cloned()
            .collect()
    }

    /// Paths with file contents, directories mapped to None. Handy for comparing trees.
    pub fn tree(&self) -> BTreeMap<String, Option<Vec<u8>>> {
        self.nodes
            .iter()
            .filter(|(p, _)| !path::is_root(p))
            .map(|(p, node)| {
                let content = (!node.is_directory).then(|| node.content.clone());
                (p.clone(), content)
            })
            .collect()
    }
}

impl FileSystemGateway for MemoryFs {
    fn find_live_entry(&self, p: &str) -> io::Result<Option<LiveEntry>> {
        let p = path::normalize(p);
        Ok(self.nodes.get(&p).map(|node| Self::entry(&p, node)))
    }

    fn find_or_create(&mut self, p: &str, is_directory: bool) -> io::Result<LiveEntry> {
        let p = path::normalize(p);
        if let Some(node) = self.nodes.get(&p) {
            if node.is_directory != is_directory {
                return Err(already_exists(&p));
            }
            return Ok(Self::entry(&p, node));
        }
        if let Some(parent) = path::parent(&p) {
            self.find_or_create(parent, true)?;
        }
        let node = Node {
            is_directory,
            timestamp: self.tick(),
            content: vec![],
        };
        let entry = Self::entry(&p, &node);
        self.nodes.insert(p, node);
        Ok(entry)
    }

    fn delete(&mut self, p: &str) -> io::Result<()> {
        let p = path::normalize(p);
        if path::is_root(&p) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the root cannot be deleted",
            ));
        }
        if !self.nodes.contains_key(&p) {
            return Err(not_found(&p));
        }
        self.nodes.retain(|key, _| !path::is_ancestor_or_self(&p, key));
        Ok(())
    }

    fn rename(&mut self, p: &str, new_name: &str) -> io::Result<LiveEntry> {
        let p = path::normalize(p);
        path::validate_name(new_name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if !self.nodes.contains_key(&p) || path::is_root(&p) {
            return Err(not_found(&p));
        }
        let target = path::with_name(&p, new_name);
        if target == p {
            return self
                .find_live_entry(&p)?
                .ok_or_else(|| not_found(&p));
        }
        if self.nodes.contains_key(&target) {
            return Err(already_exists(&target));
        }
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| path::is_ancestor_or_self(&p, key))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(node), Some(new)) = (self.nodes.remove(&old), path::rebase(&old, &p, &target))
            {
                self.nodes.insert(new, node);
            }
        }
        self.find_live_entry(&target)?
            .ok_or_else(|| not_found(&target))
    }

    fn set_content(&mut self, p: &str, bytes: &[u8], timestamp: Timestamp) -> io::Result<()> {
        let p = path::normalize(p);
        let node = self.nodes.get_mut(&p).ok_or_else(|| not_found(&p))?;
        if node.is_directory {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{p} is a directory"),
            ));
        }
        node.content = bytes.to_vec();
        node.timestamp = timestamp;
        self.clock = self.clock.max(timestamp.0);
        Ok(())
    }

    fn content(&self, p: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.read(p).map(<[u8]>::to_vec))
    }

    fn children(&self, p: &str) -> io::Result<Vec<LiveEntry>> {
        let p = path::normalize(p);
        Ok(self
            .nodes
            .iter()
            .filter(|(key, _)| path::parent(key) == Some(p.as_str()))
            .map(|(key, node)| Self::entry(key, node))
            .collect())
    }
}
