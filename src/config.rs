//!
//! minee server configuration
//! --------------------------
//! Defaults, overridden by `MINEE_*` environment variables, overridden by
//! command-line flags.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scripts::SandboxLimits;

pub const ENV_HTTP_PORT: &str = "MINEE_HTTP_PORT";
pub const ENV_STATIC_ROOT: &str = "MINEE_STATIC_ROOT";
pub const ENV_BUSINESS_ROOT: &str = "MINEE_BUSINESS_ROOT";
pub const ENV_USER_ROOT: &str = "MINEE_USER_ROOT";
pub const ENV_TYPES: &str = "MINEE_TYPES";
pub const ENV_LOG_REQUESTS: &str = "MINEE_LOG_REQUESTS";

pub const USAGE: &str = "minee Server\n\nUSAGE:\n  minee_server [--http-port N] [--static-root PATH] [--business-root PATH] [--user-root PATH] [--types FILE] [--no-request-log]\n\nOPTIONS:\n  --http-port N          HTTP port (env: MINEE_HTTP_PORT, default 8080)\n  --static-root PATH     Preloaded static assets (env: MINEE_STATIC_ROOT, default static)\n  --business-root PATH   Type pages, assets and hook scripts (env: MINEE_BUSINESS_ROOT, default data/business)\n  --user-root PATH       User data tree (env: MINEE_USER_ROOT, default data/user)\n  --types FILE           JSON type manifest (env: MINEE_TYPES)\n  --no-request-log       Disable per-request logging (env: MINEE_LOG_REQUESTS=false)\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub http_port: u16,
    pub static_root: PathBuf,
    pub business_root: PathBuf,
    pub user_root: PathBuf,
    pub types_file: Option<PathBuf>,
    pub log_requests: bool,
    pub script_memory_limit: usize,
    pub script_time_limit_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            static_root: PathBuf::from("static"),
            business_root: PathBuf::from("data/business"),
            user_root: PathBuf::from("data/user"),
            types_file: None,
            log_requests: true,
            script_memory_limit: 16 * 1024 * 1024,
            script_time_limit_ms: 2000,
        }
    }
}

impl ServerConfig {
    /// Defaults < process environment < `args`.
    pub fn from_env_and_args(args: &[String]) -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|name| env::var(name).ok());
        cfg.apply_args(args);
        cfg
    }

    /// Apply variables from `lookup`; unparsable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = lookup(ENV_HTTP_PORT).and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(v) = lookup(ENV_STATIC_ROOT) { self.static_root = v.into(); }
        if let Some(v) = lookup(ENV_BUSINESS_ROOT) { self.business_root = v.into(); }
        if let Some(v) = lookup(ENV_USER_ROOT) { self.user_root = v.into(); }
        if let Some(v) = lookup(ENV_TYPES).filter(|v| !v.is_empty()) { self.types_file = Some(v.into()); }
        if let Some(b) = lookup(ENV_LOG_REQUESTS).and_then(|v| parse_bool(&v)) { self.log_requests = b; }
    }

    pub fn apply_args(&mut self, args: &[String]) {
        if let Some(p) = arg_value(args, "--http-port").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(v) = arg_value(args, "--static-root") { self.static_root = v.into(); }
        if let Some(v) = arg_value(args, "--business-root") { self.business_root = v.into(); }
        if let Some(v) = arg_value(args, "--user-root") { self.user_root = v.into(); }
        if let Some(v) = arg_value(args, "--types") { self.types_file = Some(v.into()); }
        if has_flag(args, "--no-request-log") { self.log_requests = false; }
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit: self.script_memory_limit,
            time_limit: Duration::from_millis(self.script_time_limit_ms),
        }
    }
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).filter(|v| !v.starts_with("--")).cloned();
        }
        i += 1;
    }
    None
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
