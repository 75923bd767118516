//! Lua sandbox for entity hook scripts.
//!
//! A hook script is a Lua chunk defining a global function (`compute`,
//! `beforePost`, ...). Evaluation binds each JSON input as a named global,
//! executes the chunk, calls the function with the same inputs in order and
//! serializes the returned value back to JSON text.
//!
//! Every evaluation gets a fresh Lua state restricted to the `table`, `string`,
//! `math` and `utf8` libraries, bounded by a memory limit and a wall-clock limit
//! checked every few thousand instructions. Nothing survives between calls.
//!
//! Scripts can call two host functions whose effects are collected and returned
//! to the caller instead of being applied here:
//! - `writeFile(name, data)` requests an auxiliary file next to the instance
//! - `locate(suffix)` sets the relocation suffix for the `Location` header
//!
//! The sandbox only evaluates. Falling back to built-in defaults when a script
//! is missing or fails is the caller's business.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

const HOOK_INSTRUCTIONS: u32 = 4096;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("sandbox setup failed: {0}")]
    Setup(String),

    #[error("binding '{binding}' is not valid JSON: {message}")]
    InvalidInput { binding: String, message: String },

    #[error("{chunk}: {message}")]
    Eval { chunk: String, message: String },

    #[error("{chunk}: global function '{function}' is not defined")]
    MissingFunction { chunk: String, function: String },

    #[error("{chunk}: result cannot be serialized to JSON: {message}")]
    Unserializable { chunk: String, message: String },
}

/// One script evaluation request.
#[derive(Debug, Clone)]
pub struct ScriptCall<'a> {
    /// Diagnostic name of the chunk, usually its path.
    pub chunk_name: &'a str,
    pub source: &'a str,
    /// Global function to call after the chunk ran.
    pub function: &'a str,
    /// Named JSON inputs; bound as globals and passed as arguments in this order.
    pub args: Vec<(&'a str, String)>,
}

/// Side effects requested by a script through host functions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEffects {
    pub relocate: Option<String>,
    pub writes: Vec<(String, String)>,
}

impl HostEffects {
    /// Fold later effects into earlier ones: the last relocation wins, writes accumulate.
    pub fn merge(&mut self, later: HostEffects) {
        if later.relocate.is_some() { self.relocate = later.relocate; }
        self.writes.extend(later.writes);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    /// Returned value as JSON text.
    pub json: String,
    pub effects: HostEffects,
}

/// Pure evaluator capability: script source + JSON bindings in, JSON text out.
pub trait Sandbox: Send + Sync {
    fn evaluate(&self, call: &ScriptCall<'_>) -> Result<ScriptOutput, ScriptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub memory_limit: usize,
    pub time_limit: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self { memory_limit: 16 * 1024 * 1024, time_limit: Duration::from_millis(2000) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LuaSandbox {
    limits: SandboxLimits,
}

impl LuaSandbox {
    pub fn new(limits: SandboxLimits) -> Self { Self { limits } }

    fn prepare(&self) -> mlua::Result<Lua> {
        let lua = Lua::new_with(StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8, LuaOptions::default())?;
        lua.set_memory_limit(self.limits.memory_limit)?;
        let deadline = Instant::now() + self.limits.time_limit;
        lua.set_hook(HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTIONS), move |_lua, _debug| {
            if Instant::now() > deadline {
                Err(mlua::Error::RuntimeError("script time limit exceeded".to_string()))
            } else {
                Ok(())
            }
        });
        Ok(lua)
    }
}

impl Sandbox for LuaSandbox {
    fn evaluate(&self, call: &ScriptCall<'_>) -> Result<ScriptOutput, ScriptError> {
        let eval = |e: mlua::Error| ScriptError::Eval { chunk: call.chunk_name.to_string(), message: e.to_string() };
        let lua = self.prepare().map_err(|e| ScriptError::Setup(e.to_string()))?;
        let effects = Rc::new(RefCell::new(HostEffects::default()));
        register_host_functions(&lua, &effects).map_err(|e| ScriptError::Setup(e.to_string()))?;

        let globals = lua.globals();
        let mut inputs = Vec::with_capacity(call.args.len());
        for (name, text) in call.args.iter() {
            let v: JsonValue = serde_json::from_str(text)
                .map_err(|e| ScriptError::InvalidInput { binding: name.to_string(), message: e.to_string() })?;
            let lv = json_to_lua(&lua, &v).map_err(eval)?;
            globals.set(*name, lv.clone()).map_err(eval)?;
            inputs.push(lv);
        }

        lua.load(call.source).set_name(call.chunk_name).exec().map_err(eval)?;

        let func = match globals.get::<_, mlua::Value>(call.function).map_err(eval)? {
            mlua::Value::Function(f) => f,
            _ => return Err(ScriptError::MissingFunction { chunk: call.chunk_name.to_string(), function: call.function.to_string() }),
        };
        let mut mvals = MultiValue::new();
        for lv in inputs.into_iter().rev() {
            // Preserve argument order by pushing to front in reverse iteration
            mvals.push_front(lv);
        }
        let out: mlua::Value = func.call(mvals).map_err(eval)?;
        let j = lua_to_json(out, 0)
            .map_err(|message| ScriptError::Unserializable { chunk: call.chunk_name.to_string(), message })?;
        let json = serde_json::to_string(&j)
            .map_err(|e| ScriptError::Unserializable { chunk: call.chunk_name.to_string(), message: e.to_string() })?;
        debug!(target: "minee::scripts", "ran {}() from {}", call.function, call.chunk_name);
        let effects = effects.borrow().clone();
        Ok(ScriptOutput { json, effects })
    }
}

fn register_host_functions(lua: &Lua, effects: &Rc<RefCell<HostEffects>>) -> mlua::Result<()> {
    let fx = effects.clone();
    let write_file = lua.create_function(move |_, (name, data): (String, mlua::Value)| {
        let text = match data {
            mlua::Value::String(s) => s.to_str()?.to_string(),
            other => {
                let j = lua_to_json(other, 0).map_err(mlua::Error::RuntimeError)?;
                serde_json::to_string(&j).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?
            }
        };
        fx.borrow_mut().writes.push((name, text));
        Ok(())
    })?;
    let fx = effects.clone();
    let locate = lua.create_function(move |_, suffix: String| {
        fx.borrow_mut().relocate = Some(suffix);
        Ok(())
    })?;
    let globals = lua.globals();
    globals.set("writeFile", write_file)?;
    globals.set("locate", locate)?;
    Ok(())
}

fn json_to_lua<'lua>(lua: &'lua Lua, v: &JsonValue) -> mlua::Result<mlua::Value<'lua>> {
    use mlua::Value as LVal;
    let lv = match v {
        JsonValue::Null => LVal::Nil,
        JsonValue::Bool(b) => LVal::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() { LVal::Integer(i) } else { LVal::Number(n.as_f64().unwrap_or(0.0)) }
        }
        JsonValue::String(s) => LVal::String(lua.create_string(s)?),
        JsonValue::Array(arr) => {
            let tbl = lua.create_table()?;
            for (i, item) in arr.iter().enumerate() { tbl.set((i + 1) as i64, json_to_lua(lua, item)?)?; }
            LVal::Table(tbl)
        }
        JsonValue::Object(map) => {
            let tbl = lua.create_table()?;
            for (k, val) in map.iter() { tbl.set(k.as_str(), json_to_lua(lua, val)?)?; }
            LVal::Table(tbl)
        }
    };
    Ok(lv)
}

fn lua_to_json(v: mlua::Value, depth: usize) -> Result<JsonValue, String> {
    use mlua::Value as LVal;
    if depth > MAX_DEPTH {
        return Err("value nests too deeply (cyclic table?)".to_string());
    }
    let j = match v {
        LVal::Nil => JsonValue::Null,
        LVal::Boolean(b) => JsonValue::Bool(b),
        LVal::Integer(i) => serde_json::json!(i),
        LVal::Number(f) => {
            let n = serde_json::Number::from_f64(f).ok_or_else(|| format!("non-finite number {}", f))?;
            JsonValue::Number(n)
        }
        LVal::String(s) => JsonValue::String(s.to_str().map_err(|e| e.to_string())?.to_string()),
        LVal::Table(t) => {
            // Try array-like first
            let mut is_array = true;
            let mut max_idx = 0i64;
            for pair in t.clone().pairs::<LVal, LVal>() {
                let (k, _v) = pair.map_err(|e| e.to_string())?;
                match k { LVal::Integer(i) if i > 0 => { if i > max_idx { max_idx = i; } }, _ => { is_array = false; break; } }
            }
            if is_array && max_idx > 0 {
                let mut arr: Vec<JsonValue> = Vec::with_capacity(max_idx as usize);
                for i in 1..=max_idx {
                    let val = t.get::<i64, LVal>(i).unwrap_or(LVal::Nil);
                    arr.push(lua_to_json(val, depth + 1)?);
                }
                JsonValue::Array(arr)
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<LVal, LVal>() {
                    let (k, v) = pair.map_err(|e| e.to_string())?;
                    let key = match k {
                        LVal::String(s) => s.to_str().map_err(|e| e.to_string())?.to_string(),
                        LVal::Integer(i) => i.to_string(),
                        other => return Err(format!("unsupported table key of type {}", other.type_name())),
                    };
                    map.insert(key, lua_to_json(v, depth + 1)?);
                }
                JsonValue::Object(map)
            }
        }
        other => return Err(format!("unsupported value of type {}", other.type_name())),
    };
    Ok(j)
}
