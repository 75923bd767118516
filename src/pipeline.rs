//! Write pipeline: create (POST), replace (PUT) and partial update (PATCH).
//!
//! Create order:
//!   media type -> business type, allowed sub-type guard (`415`), unmarshal,
//!   id (`generateId` script or sequence), native before-create of the parent
//!   collection type, `beforePost` chain, `compute` (script, then native hooks),
//!   `afterPost` chain, native after-create, marshal, persist, script effects.
//!
//! Codec and disk failures abort the request. Script failures never do, see `hooks`.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::hooks::HookRunner;
use crate::registry::{default_marshal, default_unmarshal, BusinessEntity, HookContext};
use crate::scripts::HostEffects;
use crate::storage::{paths, Node, DATA_FILE, SEQUENCE_FILE, TYPE_FILE};

/// Business type named by a request media type.
///
/// The subtype after `/` with parameters and a `+suffix` removed, a leading
/// vendor tree `vnd.` dropped and every `.` turned into `/`:
/// `application/x.foo` and `application/vnd.x.foo+json` both give `x/foo`.
pub fn business_type_of(media_type: &str) -> Option<String> {
    let essence = media_type.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let subtype = subtype.split('+').next()?.trim();
    let subtype = subtype.strip_prefix("vnd.").unwrap_or(subtype);
    if subtype.is_empty() {
        return None;
    }
    Some(subtype.replace('.', "/"))
}

fn unmarshal(entity: Option<&BusinessEntity>, body: &[u8]) -> AppResult<Value> {
    let res = match entity {
        Some(e) => e.unmarshal(body),
        None => default_unmarshal(body),
    };
    res.map_err(|e| AppError::codec(format!("cannot decode payload: {:#}", e)))
}

fn marshal(entity: Option<&BusinessEntity>, value: &Value) -> AppResult<Vec<u8>> {
    let res = match entity {
        Some(e) => e.marshal(value),
        None => default_marshal(value),
    };
    res.map_err(|e| AppError::codec(format!("cannot encode payload: {:#}", e)))
}

impl Engine {
    /// POST on a collection. Returns the `Location` of the new instance.
    pub fn create(&self, collection: &str, content_type: Option<&str>, body: &[u8]) -> AppResult<String> {
        let collection = paths::as_dir(&paths::normalize(collection));
        let coll = self.user.read_collection(&collection)?
            .ok_or_else(|| AppError::not_found(format!("collection {} does not exist", collection)))?;

        // an absent or unmappable media type creates an untyped instance
        let media_type = content_type.unwrap_or("");
        let business_type = business_type_of(media_type);
        let parent = coll.type_name.as_deref().and_then(|t| self.registry.by_type(t)).cloned();
        if let Some(p) = &parent {
            let allowed = business_type.as_ref().is_some_and(|t| p.allowed_sub_types.contains(t));
            if !p.allowed_sub_types.is_empty() && !allowed {
                return Err(AppError::unsupported(media_type));
            }
        }
        let target = business_type.as_deref().and_then(|t| self.registry.by_type(t)).cloned();
        let target = target.as_deref();

        let mut payload = unmarshal(target, body)?;

        let hooks = HookRunner::new(self.business.as_ref(), self.sandbox.as_ref(), &collection, business_type.as_deref());
        let id = match hooks.generate_id(&payload) {
            Some(id) if self.user.probe(&paths::join(&collection, &id))? == Node::Missing => id,
            Some(id) => {
                warn!(target: "minee::pipeline", "generated id '{}' already exists in {}; falling back to sequence", id, collection);
                self.sequences.next_id(&collection)?.to_string()
            }
            None => self.sequences.next_id(&collection)?.to_string(),
        };
        let instance = format!("{}{}/", collection, id);
        let ctx = HookContext {
            id,
            business_type: business_type.clone().unwrap_or_default(),
            collection: collection.clone(),
            target: instance.clone(),
        };

        let mut effects = HostEffects::default();
        if let Some(f) = parent.as_ref().and_then(|p| p.hooks.before_create.clone()) {
            let (value, relocate) = f(&ctx, payload)?;
            payload = value;
            effects.relocate = relocate;
        }

        let stage = hooks.before_post(payload, &ctx);
        payload = stage.value;
        effects.merge(stage.effects);

        let stage = hooks.compute(payload, &Value::Null, &ctx);
        payload = stage.value;
        effects.merge(stage.effects);
        if let Some(f) = parent.as_ref().and_then(|p| p.hooks.compute.clone()) {
            payload = f(&ctx, payload, &Value::Null)?;
        }
        if let Some(f) = target.and_then(|t| t.hooks.compute.clone()) {
            payload = f(&ctx, payload, &Value::Null)?;
        }

        let stage = hooks.after_post(payload, &ctx);
        payload = stage.value;
        effects.merge(stage.effects);
        if let Some(f) = target.and_then(|t| t.hooks.after_create.clone()) {
            payload = f(&ctx, payload)?;
        }

        let bytes = marshal(target, &payload)?;
        self.user.write_instance(&instance, business_type.as_deref(), &bytes)?;
        self.apply_writes(&instance, &effects.writes);
        info!(target: "minee::pipeline", "created {} ({})", instance, ctx.business_type);

        let mut location = instance;
        if let Some(suffix) = effects.relocate.filter(|s| !s.is_empty()) {
            match paths::validate_relative(&suffix) {
                Ok(()) => location.push_str(&suffix),
                Err(e) => warn!(target: "minee::pipeline", "dropping relocation suffix '{}': {}", suffix.escape_debug(), e),
            }
        }
        Ok(location)
    }

    /// PUT on an instance.
    pub fn replace(&self, instance: &str, content_type: Option<&str>, body: &[u8]) -> AppResult<()> {
        let ctx = self.instance_context(instance, content_type)?;
        let declared = content_type.and_then(business_type_of);
        let entity = self.registry.by_type(&ctx.business_type).cloned();
        let entity = entity.as_deref();

        let old = self.load_old(&ctx.target, entity);
        let mut payload = unmarshal(entity, body)?;

        let hooks = HookRunner::new(self.business.as_ref(), self.sandbox.as_ref(), &ctx.collection, Some(&ctx.business_type));
        let mut effects = HostEffects::default();
        let stage = hooks.compute(payload, &old, &ctx);
        payload = stage.value;
        effects.merge(stage.effects);
        if let Some(f) = entity.and_then(|e| e.hooks.compute.clone()) {
            payload = f(&ctx, payload, &old)?;
        }

        let stage = hooks.after_put(payload, &old, &ctx);
        payload = stage.value;
        effects.merge(stage.effects);
        if let Some(f) = entity.and_then(|e| e.hooks.after_replace.clone()) {
            payload = f(&ctx, payload, &old)?;
        }

        let bytes = marshal(entity, &payload)?;
        self.user.write_instance(&ctx.target, declared.as_deref(), &bytes)?;
        self.apply_writes(&ctx.target, &effects.writes);
        info!(target: "minee::pipeline", "replaced {}", ctx.target);
        Ok(())
    }

    /// PATCH on an instance.
    pub fn patch(&self, instance: &str, content_type: Option<&str>, body: &[u8]) -> AppResult<()> {
        let ctx = self.instance_context(instance, content_type)?;
        let entity = self.registry.by_type(&ctx.business_type).cloned();
        let entity = entity.as_deref();

        let old = self.load_old(&ctx.target, entity);
        let patch = unmarshal(entity, body)?;

        let hooks = HookRunner::new(self.business.as_ref(), self.sandbox.as_ref(), &ctx.collection, Some(&ctx.business_type));
        let stage = hooks.on_patch(&patch, old, &ctx);

        let bytes = marshal(entity, &stage.value)?;
        self.user.write_instance(&ctx.target, None, &bytes)?;
        self.apply_writes(&ctx.target, &stage.effects.writes);
        info!(target: "minee::pipeline", "patched {}", ctx.target);
        Ok(())
    }

    /// Guard an instance write and build its hook context. The business type
    /// is the request's declared type, else the instance's `type` file.
    fn instance_context(&self, instance: &str, content_type: Option<&str>) -> AppResult<HookContext> {
        let info = self.user.read_collection(instance)?
            .ok_or_else(|| AppError::not_found(format!("{} does not exist", instance)))?;
        let business_type = content_type.and_then(business_type_of).or(info.type_name).unwrap_or_default();
        let target = paths::as_dir(&info.path);
        Ok(HookContext {
            id: paths::base_name(&target),
            business_type,
            collection: paths::as_dir(&paths::parent_dir(&target)),
            target,
        })
    }

    /// Stored payload of an instance, `Null` when absent or undecodable.
    fn load_old(&self, instance: &str, entity: Option<&BusinessEntity>) -> Value {
        let path = paths::join(instance, DATA_FILE);
        match self.user.read_optional(&path) {
            Ok(Some(bytes)) => match unmarshal(entity, &bytes) {
                Ok(v) => v,
                Err(e) => {
                    warn!(target: "minee::pipeline", "stored {} unreadable, treating as null: {}", path, e);
                    Value::Null
                }
            },
            Ok(None) => Value::Null,
            Err(e) => {
                warn!(target: "minee::pipeline", "cannot read {}: {}", path, e);
                Value::Null
            }
        }
    }

    /// Auxiliary files requested by scripts through `writeFile`.
    fn apply_writes(&self, instance: &str, writes: &[(String, String)]) {
        for (name, text) in writes {
            if let Err(e) = paths::validate_relative(name) {
                warn!(target: "minee::pipeline", "writeFile('{}') rejected: {}", name.escape_debug(), e);
                continue;
            }
            if name.ends_with('/') || [DATA_FILE, TYPE_FILE, SEQUENCE_FILE].contains(&name.as_str()) {
                warn!(target: "minee::pipeline", "writeFile('{}') rejected: reserved or directory name", name);
                continue;
            }
            let path = paths::join(instance, name);
            match self.user.write(&path, text.as_bytes()) {
                Ok(()) => debug!(target: "minee::pipeline", "script wrote {}", path),
                Err(e) => warn!(target: "minee::pipeline", "writeFile {} failed: {}", path, e),
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
