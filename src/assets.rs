//! Preloaded static assets.
//!
//! Every file under the static root is read once at startup and kept in memory
//! keyed by its request path (`/index.html`, `/component/table.js`). The cache is
//! immutable afterwards and shared read-only between requests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use axum::body::Bytes;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Path of the index page template inside the asset cache.
pub const INDEX_PAGE: &str = "/index.html";

#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    cache: HashMap<String, Bytes>,
}

impl StaticAssets {
    /// Walk `root` and load every regular file. A missing root yields an empty cache.
    pub fn load(root: &Path) -> Result<Self> {
        let mut cache = HashMap::new();
        if !root.exists() {
            warn!(target: "minee::assets", "static root {} does not exist; serving no static assets", root.display());
            return Ok(Self { cache });
        }
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.with_context(|| format!("While walking static root {}", root.display()))?;
            if !entry.file_type().is_file() { continue; }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let key = format!("/{}", rel.to_string_lossy().replace('\\', "/"));
            let data = std::fs::read(entry.path())
                .with_context(|| format!("While reading static asset {}", entry.path().display()))?;
            debug!(target: "minee::assets", "preload '{}' ({} bytes)", key, data.len());
            cache.insert(key, Bytes::from(data));
        }
        Ok(Self { cache })
    }

    /// Build a cache from in-memory entries.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self { cache: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    pub fn get(&self, path: &str) -> Option<Bytes> { self.cache.get(path).cloned() }

    pub fn index_page(&self) -> Option<Bytes> { self.get(INDEX_PAGE) }

    pub fn len(&self) -> usize { self.cache.len() }

    pub fn is_empty(&self) -> bool { self.cache.is_empty() }
}
