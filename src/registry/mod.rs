//! Entity type registry.
//!
//! A `BusinessEntity` is the immutable descriptor of one business type: its
//! unique type name, the context root under which its instances are addressed,
//! the sub-types it accepts as children and an optional set of compiled hooks.
//! Descriptors are registered once at startup; afterwards the registry is shared
//! read-only (behind an `Arc`) by the resolver and the write pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod manifest;

/// Context handed to descriptor hooks and bound as `context` in scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookContext {
    /// Instance id (last segment of the instance path).
    pub id: String,
    /// Business type of the payload.
    #[serde(rename = "type")]
    pub business_type: String,
    #[serde(skip)]
    pub collection: String,
    #[serde(skip)]
    pub target: String,
}

pub type UnmarshalHook = Arc<dyn Fn(&[u8]) -> anyhow::Result<Value> + Send + Sync>;
pub type MarshalHook = Arc<dyn Fn(&Value) -> anyhow::Result<Vec<u8>> + Send + Sync>;
/// Returns the transformed payload and an optional relocation suffix.
pub type BeforeCreateHook = Arc<dyn Fn(&HookContext, Value) -> anyhow::Result<(Value, Option<String>)> + Send + Sync>;
/// Receives the new payload and the prior stored payload (`Null` on create).
pub type ComputeHook = Arc<dyn Fn(&HookContext, Value, &Value) -> anyhow::Result<Value> + Send + Sync>;
pub type TransformHook = Arc<dyn Fn(&HookContext, Value) -> anyhow::Result<Value> + Send + Sync>;

/// Compiled hooks of a descriptor. Absent hooks fall back to the built-in defaults.
#[derive(Clone, Default)]
pub struct EntityHooks {
    pub unmarshal: Option<UnmarshalHook>,
    pub marshal: Option<MarshalHook>,
    pub before_create: Option<BeforeCreateHook>,
    pub compute: Option<ComputeHook>,
    pub after_create: Option<TransformHook>,
    pub after_replace: Option<ComputeHook>,
    pub filter: Option<TransformHook>,
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHooks")
            .field("unmarshal", &self.unmarshal.is_some())
            .field("marshal", &self.marshal.is_some())
            .field("before_create", &self.before_create.is_some())
            .field("compute", &self.compute.is_some())
            .field("after_create", &self.after_create.is_some())
            .field("after_replace", &self.after_replace.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Landing page module of a business type, relative to the business root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedSubTypes(Vec<String>);

impl AllowedSubTypes {
    pub fn contains(&self, sub_type: &str) -> bool { self.0.iter().any(|s| s == sub_type) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(|s| s.as_str()) }
}

#[derive(Debug, Clone)]
pub struct BusinessEntity {
    pub name: String,
    pub type_name: String,
    pub context_root: String,
    pub instanceable: bool,
    pub page: Option<Page>,
    pub allowed_sub_types: AllowedSubTypes,
    pub hooks: EntityHooks,
}

impl BusinessEntity {
    pub fn new(type_name: impl Into<String>, context_root: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: type_name.clone(),
            type_name,
            context_root: normalize_root(&context_root.into()),
            instanceable: false,
            page: None,
            allowed_sub_types: AllowedSubTypes::default(),
            hooks: EntityHooks::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }
    pub fn instanceable(mut self, yes: bool) -> Self { self.instanceable = yes; self }
    pub fn with_page(mut self, file_name: impl Into<String>) -> Self { self.page = Some(Page { file_name: file_name.into() }); self }

    pub fn allow<I, S>(mut self, sub_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_sub_types = AllowedSubTypes(sub_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_unmarshal<F>(mut self, f: F) -> Self where F: Fn(&[u8]) -> anyhow::Result<Value> + Send + Sync + 'static {
        self.hooks.unmarshal = Some(Arc::new(f)); self
    }
    pub fn on_marshal<F>(mut self, f: F) -> Self where F: Fn(&Value) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static {
        self.hooks.marshal = Some(Arc::new(f)); self
    }
    pub fn on_before_create<F>(mut self, f: F) -> Self where F: Fn(&HookContext, Value) -> anyhow::Result<(Value, Option<String>)> + Send + Sync + 'static {
        self.hooks.before_create = Some(Arc::new(f)); self
    }
    pub fn on_compute<F>(mut self, f: F) -> Self where F: Fn(&HookContext, Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static {
        self.hooks.compute = Some(Arc::new(f)); self
    }
    pub fn on_after_create<F>(mut self, f: F) -> Self where F: Fn(&HookContext, Value) -> anyhow::Result<Value> + Send + Sync + 'static {
        self.hooks.after_create = Some(Arc::new(f)); self
    }
    pub fn on_after_replace<F>(mut self, f: F) -> Self where F: Fn(&HookContext, Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static {
        self.hooks.after_replace = Some(Arc::new(f)); self
    }
    pub fn on_filter<F>(mut self, f: F) -> Self where F: Fn(&HookContext, Value) -> anyhow::Result<Value> + Send + Sync + 'static {
        self.hooks.filter = Some(Arc::new(f)); self
    }

    /// Decode a request body or stored payload. Default: JSON.
    pub fn unmarshal(&self, data: &[u8]) -> anyhow::Result<Value> {
        match &self.hooks.unmarshal {
            Some(f) => f(data),
            None => default_unmarshal(data),
        }
    }

    /// Encode a payload for storage. Default: compact JSON.
    pub fn marshal(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match &self.hooks.marshal {
            Some(f) => f(value),
            None => default_marshal(value),
        }
    }
}

pub fn default_unmarshal(data: &[u8]) -> anyhow::Result<Value> {
    Ok(serde_json::from_slice(data)?)
}

pub fn default_marshal(value: &Value) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("business entity '{type_name}' with non empty allowed sub types must provide a before-create hook")]
    MissingBeforeCreate { type_name: String },

    #[error("invalid business entity '{type_name}': {reason}")]
    InvalidDescriptor { type_name: String, reason: String },
}

/// Type name -> descriptor and context root -> descriptor, kept mutually consistent.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<BusinessEntity>>,
    roots: HashMap<String, Arc<BusinessEntity>>,
}

impl EntityRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register a descriptor. Re-registering a type name or context root replaces
    /// the previous owner (last write wins) and drops its stale mapping.
    pub fn register(&mut self, be: BusinessEntity) -> Result<(), RegistryError> {
        if be.type_name.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor { type_name: be.type_name, reason: "type name is empty".into() });
        }
        if !be.allowed_sub_types.is_empty() && be.hooks.before_create.is_none() {
            return Err(RegistryError::MissingBeforeCreate { type_name: be.type_name });
        }
        if let Some(prev) = self.entities.remove(&be.type_name) {
            self.roots.remove(&prev.context_root);
        }
        if let Some(owner) = self.roots.remove(&be.context_root) {
            warn!(target: "minee::registry", "context root '{}' moves from type '{}' to '{}'", be.context_root, owner.type_name, be.type_name);
            self.entities.remove(&owner.type_name);
        }
        debug!(target: "minee::registry", "register: type='{}' root='{}' allow={:?}", be.type_name, be.context_root, be.allowed_sub_types);
        let be = Arc::new(be);
        self.roots.insert(be.context_root.clone(), be.clone());
        self.entities.insert(be.type_name.clone(), be);
        Ok(())
    }

    pub fn by_type(&self, type_name: &str) -> Option<&Arc<BusinessEntity>> { self.entities.get(type_name) }

    pub fn by_context_root(&self, root: &str) -> Option<&Arc<BusinessEntity>> { self.roots.get(root) }

    pub fn len(&self) -> usize { self.entities.len() }

    pub fn is_empty(&self) -> bool { self.entities.is_empty() }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.entities.keys().cloned().collect();
        v.sort();
        v
    }
}
