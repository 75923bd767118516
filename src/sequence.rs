//! Per-collection id allocation backed by `sequence.json`.
//!
//! Allocation is read-increment-write on the counter file. Within the process,
//! allocations for the same collection are serialized through a striped lock
//! table keyed by the collection path, so concurrent creates never observe the
//! same counter value. Across processes no guarantee is made.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::storage::{paths, Tree};

const N_LOCKS: usize = 256;

/// Persisted counter layout: `{"nextId": <int>}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(rename = "nextId")]
    pub next_id: u64,
}

pub struct SequenceAllocator {
    tree: Arc<dyn Tree>,
    locks: Vec<Mutex<()>>, // striped per collection path
}

impl SequenceAllocator {
    pub fn new(tree: Arc<dyn Tree>) -> Self {
        let mut locks = Vec::with_capacity(N_LOCKS);
        for _ in 0..N_LOCKS { locks.push(Mutex::new(())); }
        Self { tree, locks }
    }

    #[inline]
    fn lock_idx(collection: &str) -> usize { (xxh3_64(collection.as_bytes()) as usize) & (N_LOCKS - 1) }

    /// Allocate the next id of a collection: returns the stored `nextId` and
    /// persists `nextId + 1`. An absent or unparsable counter counts as 0.
    pub fn next_id(&self, collection: &str) -> std::io::Result<u64> {
        let collection = paths::as_dir(&paths::normalize(collection));
        let _guard = self.locks[Self::lock_idx(&collection)].lock();
        let seq = match self.tree.read_counter(&collection)? {
            Some(bytes) => match serde_json::from_slice::<Sequence>(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "minee::sequence", "unparsable {}{}: {}; restarting at 0", collection, crate::storage::SEQUENCE_FILE, e);
                    Sequence::default()
                }
            },
            None => {
                debug!(target: "minee::sequence", "{}{} not found, generating new one", collection, crate::storage::SEQUENCE_FILE);
                Sequence::default()
            }
        };
        let next = Sequence { next_id: seq.next_id.saturating_add(1) };
        let bytes = serde_json::to_vec(&next).map_err(std::io::Error::other)?;
        self.tree.write_counter(&collection, &bytes)?;
        Ok(seq.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsTree, MemTree};
    use std::collections::HashSet;

    #[test]
    fn sequential_allocations_increase() {
        let tree: Arc<dyn Tree> = Arc::new(MemTree::new().with_dir("/items"));
        let alloc = SequenceAllocator::new(tree.clone());
        assert_eq!(alloc.next_id("/items/").unwrap(), 0);
        assert_eq!(alloc.next_id("/items/").unwrap(), 1);
        assert_eq!(alloc.next_id("/items").unwrap(), 2);
        assert_eq!(alloc.next_id("//items//").unwrap(), 3);
        assert_eq!(tree.read_counter("/items/").unwrap().unwrap(), br#"{"nextId":4}"#);
        assert_eq!(alloc.next_id("/items/").unwrap(), 4);
    }

    #[test]
    fn existing_counter_is_honoured() {
        let tree: Arc<dyn Tree> = Arc::new(MemTree::new().with_file("/items/sequence.json", r#"{"nextId":5}"#));
        let alloc = SequenceAllocator::new(tree.clone());
        assert_eq!(alloc.next_id("/items/").unwrap(), 5);
        assert_eq!(tree.read_counter("/items/").unwrap().unwrap(), br#"{"nextId":6}"#);
    }

    #[test]
    fn garbage_counter_restarts_at_zero() {
        let tree: Arc<dyn Tree> = Arc::new(MemTree::new().with_file("/items/sequence.json", "not json"));
        let alloc = SequenceAllocator::new(tree);
        assert_eq!(alloc.next_id("/items/").unwrap(), 0);
        assert_eq!(alloc.next_id("/items/").unwrap(), 1);
    }

    #[test]
    fn collections_have_independent_counters() {
        let tree: Arc<dyn Tree> = Arc::new(MemTree::new());
        let alloc = SequenceAllocator::new(tree);
        assert_eq!(alloc.next_id("/a/").unwrap(), 0);
        assert_eq!(alloc.next_id("/b/").unwrap(), 0);
        assert_eq!(alloc.next_id("/a/").unwrap(), 1);
    }

    #[test]
    fn concurrent_allocations_on_disk_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let tree: Arc<dyn Tree> = Arc::new(FsTree::new(tmp.path()).unwrap());
        tree.create_dir("/items/").unwrap();
        let alloc = Arc::new(SequenceAllocator::new(tree.clone()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let a = alloc.clone();
            handles.push(std::thread::spawn(move || {
                (0..25).map(|_| a.next_id("/items/").unwrap()).collect::<Vec<u64>>()
            }));
        }
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(tree.read_counter("/items/").unwrap().unwrap(), br#"{"nextId":200}"#);
    }
}
