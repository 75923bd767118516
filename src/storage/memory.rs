use std::collections::BTreeMap;
use std::io;

use parking_lot::RwLock;

use super::{ChildEntry, Node, Tree};

#[derive(Debug, Clone)]
enum Entry {
    Dir,
    File(Vec<u8>),
}

/// In-memory `Tree` used to exercise the resolver and pipeline without disk I/O.
#[derive(Debug)]
pub struct MemTree {
    entries: RwLock<BTreeMap<String, Entry>>,
}

fn key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else if trimmed.starts_with('/') { trimmed.to_string() } else { format!("/{}", trimmed) }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path))
}

impl Default for MemTree {
    fn default() -> Self { Self::new() }
}

impl MemTree {
    pub fn new() -> Self {
        let mut m = BTreeMap::new();
        m.insert("/".to_string(), Entry::Dir);
        Self { entries: RwLock::new(m) }
    }

    /// Builder-style helper for fixtures: write a file, creating parents.
    pub fn with_file(self, path: &str, data: impl AsRef<[u8]>) -> Self {
        // Writes into a MemTree cannot fail
        let _ = self.write(path, data.as_ref());
        self
    }

    /// Builder-style helper for fixtures: create a directory.
    pub fn with_dir(self, path: &str) -> Self {
        let _ = self.create_dir(path);
        self
    }

    fn ensure_dirs(map: &mut BTreeMap<String, Entry>, path: &str) -> io::Result<()> {
        let k = key(path);
        let mut acc = String::new();
        for seg in k.split('/').filter(|s| !s.is_empty()) {
            acc.push('/');
            acc.push_str(seg);
            match map.get(&acc) {
                Some(Entry::File(_)) => return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("{} is a file", acc))),
                Some(Entry::Dir) => {}
                None => { map.insert(acc.clone(), Entry::Dir); }
            }
        }
        Ok(())
    }
}

impl Tree for MemTree {
    fn probe(&self, path: &str) -> io::Result<Node> {
        let map = self.entries.read();
        Ok(match map.get(&key(path)) {
            Some(Entry::Dir) => Node::Dir,
            Some(Entry::File(_)) if path.ends_with('/') => Node::Missing,
            Some(Entry::File(_)) => Node::File,
            None => Node::Missing,
        })
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let map = self.entries.read();
        match map.get(&key(path)) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            Some(Entry::Dir) => Err(io::Error::new(io::ErrorKind::Other, format!("{} is a directory", path))),
            None => Err(not_found(path)),
        }
    }

    fn list_children(&self, dir: &str) -> io::Result<Vec<ChildEntry>> {
        let map = self.entries.read();
        let k = key(dir);
        match map.get(&k) {
            Some(Entry::Dir) => {}
            Some(Entry::File(_)) => return Err(io::Error::new(io::ErrorKind::Other, format!("{} is not a directory", dir))),
            None => return Err(not_found(dir)),
        }
        let prefix = if k == "/" { "/".to_string() } else { format!("{}/", k) };
        let mut out = Vec::new();
        for (path, entry) in map.range(prefix.clone()..) {
            let Some(rest) = path.strip_prefix(&prefix) else { break };
            if rest.is_empty() || rest.contains('/') { continue; }
            out.push(ChildEntry { name: rest.to_string(), is_dir: matches!(entry, Entry::Dir) });
        }
        Ok(out)
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let k = key(path);
        let mut map = self.entries.write();
        if let Some(Entry::Dir) = map.get(&k) {
            return Err(io::Error::new(io::ErrorKind::Other, format!("{} is a directory", path)));
        }
        let parent = super::paths::parent_dir(&k);
        Self::ensure_dirs(&mut map, &parent)?;
        map.insert(k, Entry::File(data.to_vec()));
        Ok(())
    }

    fn create_dir(&self, path: &str) -> io::Result<()> {
        let mut map = self.entries.write();
        Self::ensure_dirs(&mut map, path)
    }
}
