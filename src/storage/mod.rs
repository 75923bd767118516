//!
//! minee storage module
//! --------------------
//! The user data tree is a plain directory hierarchy used as a database:
//! directories are collections, numbered sub-directories are entity instances,
//! and small sentinel files carry metadata. A collection may hold a `type` file
//! naming its business type and a `sequence.json` counter; an instance holds a
//! `type` file (declared content subtype) and its payload in `data.json`.
//!
//! All access goes through the `Tree` trait so that the resolver and the write
//! pipeline can run against an in-memory fake in tests. `FsTree` is the on-disk
//! implementation used by the server; `MemTree` is the fake.
//!
//! Paths handed to a `Tree` are logical request paths (`/items/5/`), always
//! rooted at the tree's own root; a trailing `/` marks a directory reference.

use std::io;

mod fs;
mod memory;
pub mod paths;

pub use fs::FsTree;
pub use memory::MemTree;

/// Sentinel naming the business type of a collection or instance.
pub const TYPE_FILE: &str = "type";
/// Payload of an entity instance.
pub const DATA_FILE: &str = "data.json";
/// Per-collection id counter.
pub const SEQUENCE_FILE: &str = "sequence.json";

/// Result of probing a path in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Missing,
    Dir,
    File,
}

/// One immediate child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A directory viewed as a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub path: String,
    /// Content of the `type` sentinel, if present.
    pub type_name: Option<String>,
}

/// Minimal key-value view over a directory tree.
pub trait Tree: Send + Sync {
    /// Stat a path. A trailing `/` on a path naming a plain file yields `Missing`.
    fn probe(&self, path: &str) -> io::Result<Node>;

    /// Read a whole file.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Immediate children of a directory, sorted by name.
    fn list_children(&self, dir: &str) -> io::Result<Vec<ChildEntry>>;

    /// Replace a file's content, creating parent directories as needed.
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Create a directory and all of its parents.
    fn create_dir(&self, path: &str) -> io::Result<()>;

    /// Read a file, mapping "not found" to `None`.
    fn read_optional(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        match self.read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Content of the `type` sentinel inside `dir`, if readable.
    fn read_type(&self, dir: &str) -> Option<String> {
        let bytes = self.read(&paths::join(dir, TYPE_FILE)).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let trimmed = text.trim_end();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    }

    /// Look up a collection directory. `None` when the path is not a directory.
    fn read_collection(&self, dir: &str) -> io::Result<Option<CollectionInfo>> {
        match self.probe(dir)? {
            Node::Dir => Ok(Some(CollectionInfo { path: dir.to_string(), type_name: self.read_type(dir) })),
            _ => Ok(None),
        }
    }

    /// Raw content of the collection's counter file, if any.
    fn read_counter(&self, collection: &str) -> io::Result<Option<Vec<u8>>> {
        self.read_optional(&paths::join(collection, SEQUENCE_FILE))
    }

    fn write_counter(&self, collection: &str, data: &[u8]) -> io::Result<()> {
        self.write(&paths::join(collection, SEQUENCE_FILE), data)
    }

    /// Persist an instance: directory, optional `type` sentinel, then `data.json`.
    fn write_instance(&self, instance: &str, type_name: Option<&str>, data: &[u8]) -> io::Result<()> {
        self.create_dir(instance)?;
        if let Some(t) = type_name {
            self.write(&paths::join(instance, TYPE_FILE), t.as_bytes())?;
        }
        self.write(&paths::join(instance, DATA_FILE), data)
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
