//! Declarative type manifest: a JSON array of descriptors without compiled hooks.
//!
//! ```json
//! [ { "name": "Widget", "type": "widget", "contextRoot": "/widget",
//!     "instanceable": true, "page": "/widget/page.js", "allow": [] } ]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BusinessEntity, EntityRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub context_root: String,
    #[serde(default)]
    pub instanceable: bool,
    #[serde(default)]
    pub page: Option<String>,
    /// Allowed child types.
    #[serde(default)]
    pub allow: Vec<String>,
}

impl ManifestEntry {
    pub fn to_entity(&self) -> BusinessEntity {
        let mut be = BusinessEntity::new(self.type_name.clone(), self.context_root.clone())
            .instanceable(self.instanceable)
            .allow(self.allow.iter().cloned());
        if let Some(name) = &self.name { be = be.named(name.clone()); }
        if let Some(page) = &self.page { be = be.with_page(page.clone()); }
        be
    }
}

pub fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    serde_json::from_str(text).context("type manifest must be a JSON array of descriptors")
}

pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("While reading type manifest {}", path.display()))?;
    parse_manifest(&text)
}

/// Register every manifest entry; entries rejected by the registry are logged and skipped.
/// Returns the number of registered descriptors.
pub fn register_manifest(registry: &mut EntityRegistry, entries: &[ManifestEntry]) -> usize {
    let mut ok = 0;
    for entry in entries {
        match registry.register(entry.to_entity()) {
            Ok(()) => {
                ok += 1;
                info!(target: "minee::registry", "registered type '{}' at '{}'", entry.type_name, entry.context_root);
            }
            Err(e) => warn!(target: "minee::registry", "skipping manifest entry: {}", e),
        }
    }
    ok
}
