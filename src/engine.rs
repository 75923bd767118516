//! Process-scoped state shared by the resolver and the write pipeline.
//!
//! Built once at startup and handed to every request explicitly; the registry
//! and the asset cache are immutable, all mutable state lives in the trees.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Method;

use crate::assets::StaticAssets;
use crate::registry::EntityRegistry;
use crate::resource::{Listing, Reply};
use crate::scripts::Sandbox;
use crate::sequence::SequenceAllocator;
use crate::storage::{paths, Tree};

#[derive(Clone)]
pub struct Engine {
    pub(crate) registry: Arc<EntityRegistry>,
    pub(crate) assets: Arc<StaticAssets>,
    pub(crate) user: Arc<dyn Tree>,
    pub(crate) business: Arc<dyn Tree>,
    pub(crate) sandbox: Arc<dyn Sandbox>,
    pub(crate) sequences: Arc<SequenceAllocator>,
}

impl Engine {
    pub fn new(
        registry: EntityRegistry,
        assets: StaticAssets,
        user: Arc<dyn Tree>,
        business: Arc<dyn Tree>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        let sequences = Arc::new(SequenceAllocator::new(user.clone()));
        Self { registry: Arc::new(registry), assets: Arc::new(assets), user, business, sandbox, sequences }
    }

    pub fn registry(&self) -> &EntityRegistry { &self.registry }
    pub fn assets(&self) -> &StaticAssets { &self.assets }
    pub fn user_tree(&self) -> &dyn Tree { self.user.as_ref() }
    pub fn business_tree(&self) -> &dyn Tree { self.business.as_ref() }

    /// Resolve the path and let the resulting resource serve the request.
    pub fn handle(&self, req: &EngineRequest) -> Reply {
        let path = paths::normalize(&req.path);
        let resource = self.resolve(&path);
        match req.method {
            Method::GET | Method::HEAD => resource.get(self, req.listing),
            Method::POST => resource.post(self, req),
            Method::PUT => resource.put(self, req),
            Method::PATCH => resource.patch(self, req),
            _ => resource.unsupported(),
        }
    }
}

/// Transport-independent view of one request.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: Method,
    /// Percent-decoded, validated path without the query string.
    pub path: String,
    /// Listing format requested through the query string or `Accept`.
    pub listing: Listing,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl EngineRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), listing: Listing::Html, content_type: None, body: Bytes::new() }
    }

    pub fn write(method: Method, path: impl Into<String>, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            listing: Listing::Html,
            content_type: content_type.map(|s| s.to_string()),
            body: body.into(),
        }
    }

    pub fn with_listing(mut self, listing: Listing) -> Self { self.listing = listing; self }
}

#[cfg(test)]
impl Engine {
    /// Engine over in-memory trees with a minimal index template.
    pub(crate) fn in_memory(registry: EntityRegistry, user: crate::storage::MemTree, business: crate::storage::MemTree) -> Self {
        let assets = StaticAssets::from_entries([
            (crate::assets::INDEX_PAGE, "<title>{{.PageTitle}}</title><base href=\"{{.PathToRoot}}\"><script>{{.JsonOutput}}</script>"),
        ]);
        Engine::new(registry, assets, Arc::new(user), Arc::new(business), Arc::new(crate::scripts::LuaSandbox::default()))
    }
}
