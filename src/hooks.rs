//! Script hook lookup and fallback policy for the write pipeline.
//!
//! Scripts live in the business tree. A type script sits at
//! `/<business type>/<hook>.lua`, a collection script at
//! `<collection path><hook>.lua`. Single hooks prefer the collection script;
//! the `beforePost` chain runs collection then type, the `afterPost` chain type
//! then collection.
//!
//! Any missing or failing script degrades to the built-in default for its hook
//! (identity, sequence allocation for ids, old data for patches). Failures are
//! logged here and never reach the request.

use serde_json::Value;
use tracing::{debug, warn};

use crate::registry::HookContext;
use crate::scripts::{HostEffects, Sandbox, ScriptCall, ScriptError};
use crate::storage::{paths, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    GenerateId,
    BeforePost,
    Compute,
    AfterPost,
    AfterPut,
    OnPatch,
}

impl Hook {
    pub const ALL: [Hook; 6] = [Hook::GenerateId, Hook::BeforePost, Hook::Compute, Hook::AfterPost, Hook::AfterPut, Hook::OnPatch];

    /// Global function the script must define.
    pub fn function(self) -> &'static str {
        match self {
            Hook::GenerateId => "generateId",
            Hook::BeforePost => "beforePost",
            Hook::Compute => "compute",
            Hook::AfterPost => "afterPost",
            Hook::AfterPut => "afterPut",
            Hook::OnPatch => "onPatch",
        }
    }

    pub fn file_name(self) -> String { format!("{}.lua", self.function()) }

    pub fn is_script_name(name: &str) -> bool { Hook::ALL.iter().any(|h| h.file_name() == name) }
}

/// Result of a transform stage: the (possibly unchanged) payload plus effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub value: Value,
    pub effects: HostEffects,
}

impl Stage {
    fn passthrough(value: Value) -> Self { Self { value, effects: HostEffects::default() } }
}

struct Script {
    path: String,
    source: String,
}

pub struct HookRunner<'a> {
    business: &'a dyn Tree,
    sandbox: &'a dyn Sandbox,
    collection: String,
    business_type: Option<String>,
}

impl<'a> HookRunner<'a> {
    pub fn new(business: &'a dyn Tree, sandbox: &'a dyn Sandbox, collection: &str, business_type: Option<&str>) -> Self {
        Self {
            business,
            sandbox,
            collection: paths::as_dir(collection),
            business_type: business_type.filter(|t| !t.is_empty()).map(|t| t.to_string()),
        }
    }

    fn type_script(&self, hook: Hook) -> Option<Script> {
        let bt = self.business_type.as_deref()?;
        self.load(format!("/{}/{}", bt.trim_matches('/'), hook.file_name()))
    }

    fn collection_script(&self, hook: Hook) -> Option<Script> {
        self.load(paths::join(&self.collection, &hook.file_name()))
    }

    fn load(&self, path: String) -> Option<Script> {
        match self.business.read_optional(&path) {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(source) => Some(Script { path, source }),
                Err(_) => {
                    warn!(target: "minee::pipeline", "script {} is not valid UTF-8; ignored", path);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(target: "minee::pipeline", "cannot read script {}: {}", path, e);
                None
            }
        }
    }

    /// Collection script wins over the type script.
    fn single(&self, hook: Hook) -> Option<Script> {
        self.collection_script(hook).or_else(|| self.type_script(hook))
    }

    fn chain(&self, hook: Hook, collection_first: bool) -> Vec<Script> {
        let (a, b) = if collection_first {
            (self.collection_script(hook), self.type_script(hook))
        } else {
            (self.type_script(hook), self.collection_script(hook))
        };
        a.into_iter().chain(b).collect()
    }

    fn eval(&self, script: &Script, hook: Hook, args: Vec<(&str, String)>) -> Result<(Value, HostEffects), ScriptError> {
        let out = self.sandbox.evaluate(&ScriptCall {
            chunk_name: &script.path,
            source: &script.source,
            function: hook.function(),
            args,
        })?;
        let value = serde_json::from_str(&out.json)
            .map_err(|e| ScriptError::Unserializable { chunk: script.path.clone(), message: e.to_string() })?;
        debug!(target: "minee::pipeline", "{} applied from {}", hook.function(), script.path);
        Ok((value, out.effects))
    }

    fn run_stage(&self, script: &Script, hook: Hook, input: Value, args: Vec<(&str, String)>) -> Stage {
        match self.eval(script, hook, args) {
            Ok((value, effects)) => Stage { value, effects },
            Err(e) => {
                warn!(target: "minee::pipeline", "{} failed, keeping input: {}", hook.function(), e);
                Stage::passthrough(input)
            }
        }
    }

    /// Id from `generateId.lua`. `None` means: use the sequence allocator.
    pub fn generate_id(&self, data: &Value) -> Option<String> {
        let script = self.single(Hook::GenerateId)?;
        let (value, _) = match self.eval(&script, Hook::GenerateId, vec![("data", data.to_string())]) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "minee::pipeline", "generateId failed, falling back to sequence: {}", e);
                return None;
            }
        };
        let id = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                warn!(target: "minee::pipeline", "generateId returned {} instead of a string; falling back to sequence", other);
                return None;
            }
        };
        match paths::validate_segment(&id) {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(target: "minee::pipeline", "generateId returned unusable id '{}': {}; falling back to sequence", id.escape_debug(), e);
                None
            }
        }
    }

    pub fn before_post(&self, data: Value, ctx: &HookContext) -> Stage {
        let context = context_json(ctx);
        let mut stage = Stage::passthrough(data);
        for script in self.chain(Hook::BeforePost, true) {
            let input = stage.value.clone();
            let next = self.run_stage(&script, Hook::BeforePost, input.clone(), vec![("data", input.to_string()), ("context", context.clone())]);
            stage.value = next.value;
            stage.effects.merge(next.effects);
        }
        stage
    }

    pub fn compute(&self, data: Value, old: &Value, ctx: &HookContext) -> Stage {
        match self.single(Hook::Compute) {
            Some(script) => {
                let args = vec![("data", data.to_string()), ("oldData", old.to_string()), ("context", context_json(ctx))];
                self.run_stage(&script, Hook::Compute, data, args)
            }
            None => Stage::passthrough(data),
        }
    }

    pub fn after_post(&self, data: Value, ctx: &HookContext) -> Stage {
        let context = context_json(ctx);
        let mut stage = Stage::passthrough(data);
        for script in self.chain(Hook::AfterPost, false) {
            let input = stage.value.clone();
            let next = self.run_stage(&script, Hook::AfterPost, input.clone(), vec![("data", input.to_string()), ("context", context.clone())]);
            stage.value = next.value;
            stage.effects.merge(next.effects);
        }
        stage
    }

    pub fn after_put(&self, data: Value, old: &Value, ctx: &HookContext) -> Stage {
        match self.single(Hook::AfterPut) {
            Some(script) => {
                let args = vec![("data", data.to_string()), ("oldData", old.to_string()), ("context", context_json(ctx))];
                self.run_stage(&script, Hook::AfterPut, data, args)
            }
            None => Stage::passthrough(data),
        }
    }

    /// Merge a patch into the stored payload. Default: the stored payload unchanged.
    pub fn on_patch(&self, patch: &Value, old: Value, ctx: &HookContext) -> Stage {
        match self.single(Hook::OnPatch) {
            Some(script) => {
                let args = vec![("patchData", patch.to_string()), ("oldData", old.to_string()), ("context", context_json(ctx))];
                self.run_stage(&script, Hook::OnPatch, old, args)
            }
            None => Stage::passthrough(old),
        }
    }
}

fn context_json(ctx: &HookContext) -> String {
    serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::LuaSandbox;
    use crate::storage::MemTree;
    use serde_json::json;

    fn ctx() -> HookContext {
        HookContext { id: "5".into(), business_type: "widget".into(), collection: "/items/".into(), target: "/items/5/".into() }
    }

    #[test]
    fn defaults_without_scripts() {
        let tree = MemTree::new();
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        let data = json!({"a": 1});
        assert_eq!(hooks.generate_id(&data), None);
        assert_eq!(hooks.before_post(data.clone(), &ctx()).value, data);
        assert_eq!(hooks.compute(data.clone(), &Value::Null, &ctx()).value, data);
        assert_eq!(hooks.after_post(data.clone(), &ctx()).value, data);
        assert_eq!(hooks.after_put(data.clone(), &Value::Null, &ctx()).value, data);
        assert_eq!(hooks.on_patch(&json!({"b": 2}), data.clone(), &ctx()).value, data);
    }

    #[test]
    fn collection_script_overrides_type_script() {
        let tree = MemTree::new()
            .with_file("/widget/compute.lua", "function compute(d) d.by = 'type' return d end")
            .with_file("/items/compute.lua", "function compute(d) d.by = 'collection' return d end");
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        assert_eq!(hooks.compute(json!({}), &Value::Null, &ctx()).value, json!({"by": "collection"}));

        let other = HookRunner::new(&tree, &sandbox, "/other/", Some("widget"));
        assert_eq!(other.compute(json!({}), &Value::Null, &ctx()).value, json!({"by": "type"}));
    }

    #[test]
    fn chains_run_in_order() {
        let tree = MemTree::new()
            .with_file("/widget/beforePost.lua", "function beforePost(d) table.insert(d.trail, 'type') return d end")
            .with_file("/items/beforePost.lua", "function beforePost(d) table.insert(d.trail, 'collection') locate('edit/') return d end")
            .with_file("/widget/afterPost.lua", "function afterPost(d) table.insert(d.trail, 'type') return d end")
            .with_file("/items/afterPost.lua", "function afterPost(d) table.insert(d.trail, 'collection') return d end");
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        let before = hooks.before_post(json!({"trail": ["start"]}), &ctx());
        assert_eq!(before.value, json!({"trail": ["start", "collection", "type"]}));
        assert_eq!(before.effects.relocate.as_deref(), Some("edit/"));
        let after = hooks.after_post(json!({"trail": ["start"]}), &ctx());
        assert_eq!(after.value, json!({"trail": ["start", "type", "collection"]}));
    }

    #[test]
    fn failing_scripts_fall_back() {
        let tree = MemTree::new()
            .with_file("/widget/compute.lua", "function compute(d) error('nope') end")
            .with_file("/widget/onPatch.lua", "function onPatch(", )
            .with_file("/widget/generateId.lua", "function generateId(d) return '../escape' end");
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        assert_eq!(hooks.compute(json!({"a": 1}), &Value::Null, &ctx()).value, json!({"a": 1}));
        assert_eq!(hooks.on_patch(&json!({"b": 2}), json!({"a": 1}), &ctx()).value, json!({"a": 1}));
        assert_eq!(hooks.generate_id(&json!({})), None);
    }

    #[test]
    fn generated_ids_and_patch_merge() {
        let tree = MemTree::new()
            .with_file("/widget/generateId.lua", "function generateId(d) return d.code end")
            .with_file("/widget/onPatch.lua", "function onPatch(p, o) for k, v in pairs(p) do o[k] = v end return o end");
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        assert_eq!(hooks.generate_id(&json!({"code": "abc"})).as_deref(), Some("abc"));
        assert_eq!(hooks.generate_id(&json!({"code": 42})).as_deref(), Some("42"));
        let merged = hooks.on_patch(&json!({"b": 2}), json!({"a": 1}), &ctx()).value;
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(2));
    }

    #[test]
    fn context_binding_carries_id_and_type() {
        let tree = MemTree::new()
            .with_file("/widget/compute.lua", "function compute(d, o, c) return { id = context.id, t = c.type } end");
        let sandbox = LuaSandbox::default();
        let hooks = HookRunner::new(&tree, &sandbox, "/items/", Some("widget"));
        assert_eq!(hooks.compute(json!({}), &Value::Null, &ctx()).value, json!({"id": "5", "t": "widget"}));
    }

    #[test]
    fn script_names() {
        assert!(Hook::is_script_name("compute.lua"));
        assert!(Hook::is_script_name("generateId.lua"));
        assert!(!Hook::is_script_name("page.js"));
    }
}
