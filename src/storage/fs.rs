use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::{ChildEntry, Node, Tree};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk `Tree` rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    /// Create a tree rooted at the given folder. The folder is created if missing.
    pub fn new<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Return the configured root folder.
    pub fn root_path(&self) -> &Path { &self.root }

    fn local(&self, path: &str) -> PathBuf {
        let rel = path.trim_start_matches('/').trim_end_matches('/');
        if rel.is_empty() { self.root.clone() } else { self.root.join(rel) }
    }
}

impl Tree for FsTree {
    fn probe(&self, path: &str) -> io::Result<Node> {
        match fs::metadata(self.local(path)) {
            Ok(md) if md.is_dir() => Ok(Node::Dir),
            // `/file/` names a directory that does not exist
            Ok(_) if path.ends_with('/') => Ok(Node::Missing),
            Ok(_) => Ok(Node::File),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Node::Missing),
            Err(e) => Err(e),
        }
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.local(path))
    }

    fn list_children(&self, dir: &str) -> io::Result<Vec<ChildEntry>> {
        let mut out = Vec::new();
        for ent in fs::read_dir(self.local(dir))? {
            let ent = ent?;
            let is_dir = ent.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            out.push(ChildEntry { name: ent.file_name().to_string_lossy().to_string(), is_dir });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let target = self.local(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write to a sibling temp file and rename so readers never observe a torn file
        let file_name = target.file_name().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let tmp = target.with_file_name(format!(".{}.tmp-{}-{}", file_name, std::process::id(), TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!(target: "minee::storage", "write: '{}' ({} bytes)", target.display(), data.len());
        Ok(())
    }

    fn create_dir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.local(path))
    }
}
