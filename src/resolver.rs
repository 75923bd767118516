//! Resource resolution: request path -> exactly one `Resource`.
//!
//! Decision order, first match wins:
//! 1. preloaded static asset
//! 2. parent directory is a registered context root: landing page (trailing
//!    separator) or the type's page script
//! 3. probe of the user tree: slash redirect, directory index, plain file or
//!    business file (parent directory carries a registered `type`)
//! 4. parent directory carries a registered `type`: canonical redirect under
//!    the type's context root
//! 5. business tree: plain file, read-only directory index, `303` to the
//!    current version announced by `info.json`
//! 6. `404`
//!
//! Stat and read failures while deciding become a `500` status resource.

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::hooks::Hook;
use crate::resource::{Listing, RedirectKind, Resource, Root};
use crate::storage::{paths, Node};

/// Last segment that serves a type's page module from the business tree.
pub const PAGE_SCRIPT: &str = "page.js";
/// Version pointer inside a business directory.
pub const INFO_FILE: &str = "info.json";

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "currentVersion", default)]
    current_version: Option<String>,
}

impl Engine {
    pub fn resolve(&self, path: &str) -> Resource {
        if let Some(data) = self.assets.get(path) {
            trace!(target: "minee::resolver", "{} -> static asset", path);
            return Resource::Static { data };
        }

        let parent = paths::parent_dir(path);
        let base = paths::base_name(path);

        if let Some(entity) = self.registry.by_context_root(&parent) {
            if path.ends_with('/') {
                return Resource::Landing { entity: entity.clone(), path: path.to_string() };
            }
            if base == PAGE_SCRIPT {
                if let Some(page) = &entity.page {
                    return match self.business.read(&page.file_name) {
                        Ok(bytes) => Resource::Static { data: bytes.into() },
                        Err(e) => {
                            warn!(target: "minee::resolver", "page {} of type '{}' unreadable: {}", page.file_name, entity.type_name, e);
                            Resource::fault(e.to_string())
                        }
                    };
                }
            }
        }

        match self.user.probe(path) {
            Ok(Node::Missing) => {
                if let Some(listing) = self.listing_alias(path, &parent, &base) {
                    return listing;
                }
            }
            Ok(Node::Dir) => {
                if !path.ends_with('/') {
                    return Resource::redirect(RedirectKind::Slash, paths::as_dir(path));
                }
                return Resource::Directory { root: Root::User, path: path.to_string(), listing: None };
            }
            Ok(Node::File) => {
                let data = match self.user.read(path) {
                    Ok(d) => d,
                    Err(e) => return Resource::fault(e.to_string()),
                };
                match self.user.read_type(&parent) {
                    None => return Resource::Static { data: data.into() },
                    Some(t) => match self.registry.by_type(&t) {
                        Some(entity) => {
                            return Resource::Business { entity: entity.clone(), path: path.to_string(), data: data.into() };
                        }
                        None => debug!(target: "minee::resolver", "{}: parent type '{}' is not registered", path, t),
                    },
                }
            }
            Err(e) => {
                warn!(target: "minee::resolver", "probe {} failed: {}", path, e);
                return Resource::fault(e.to_string());
            }
        }

        if let Some(entity) = self.user.read_type(&parent).and_then(|t| self.registry.by_type(&t)) {
            let mut target = paths::join(&entity.context_root, &base);
            if path.ends_with('/') { target.push('/'); }
            if target != path {
                return Resource::redirect(RedirectKind::Canonical, target);
            }
        }

        self.resolve_business(path, &parent, &base)
    }

    /// `/items/json` and `/items/module` list `/items/` when `/items/` is a directory.
    fn listing_alias(&self, path: &str, parent: &str, base: &str) -> Option<Resource> {
        if path.ends_with('/') { return None; }
        let listing = Listing::from_segment(base)?;
        let dir = paths::as_dir(parent);
        match self.user.probe(&dir) {
            Ok(Node::Dir) => Some(Resource::Directory { root: Root::User, path: dir, listing: Some(listing) }),
            _ => None,
        }
    }

    fn resolve_business(&self, path: &str, parent: &str, base: &str) -> Resource {
        match self.business.probe(path) {
            Ok(Node::File) => {
                if Hook::is_script_name(base) {
                    return Resource::status(404);
                }
                match self.business.read(path) {
                    Ok(bytes) => Resource::Static { data: bytes.into() },
                    Err(e) => Resource::fault(e.to_string()),
                }
            }
            Ok(Node::Dir) if path.ends_with('/') => Resource::Directory { root: Root::Business, path: path.to_string(), listing: None },
            Ok(Node::Dir) => Resource::redirect(RedirectKind::Slash, paths::as_dir(path)),
            Ok(Node::Missing) => match self.current_version(parent) {
                Some(v) if !path.ends_with('/') => {
                    Resource::redirect(RedirectKind::Version, paths::join(&paths::as_dir(parent), &format!("versions/{}/{}", v, base)))
                }
                _ => {
                    debug!(target: "minee::resolver", "{} -> 404", path);
                    Resource::status(404)
                }
            },
            Err(e) => {
                warn!(target: "minee::resolver", "business probe {} failed: {}", path, e);
                Resource::fault(e.to_string())
            }
        }
    }

    fn current_version(&self, dir: &str) -> Option<String> {
        let bytes = self.business.read_optional(&paths::join(dir, INFO_FILE)).ok()??;
        let info: VersionInfo = match serde_json::from_slice(&bytes) {
            Ok(i) => i,
            Err(e) => {
                warn!(target: "minee::resolver", "{}/{} unparsable: {}", dir, INFO_FILE, e);
                return None;
            }
        };
        let v = info.current_version.filter(|v| !v.is_empty())?;
        match paths::validate_segment(&v) {
            Ok(()) => Some(v),
            Err(e) => {
                warn!(target: "minee::resolver", "{}/{}: ignoring currentVersion: {}", dir, INFO_FILE, e);
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
