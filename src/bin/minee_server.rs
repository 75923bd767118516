//!
//! minee server binary
//! -------------------
//! Command-line entry point for the minee HTTP server. Supports configuration
//! via CLI flags and environment variables; business types come from the
//! optional JSON type manifest.

use anyhow::Result;
use std::env;

use minee::config::{has_flag, ServerConfig, USAGE};
use minee::registry::EntityRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    println!(r"           _
  __ _  (_)__  ___ ___
 /  ' \/ / _ \/ -_) -_)
/_/_/_/_/_//_/\__/\__/ ");

    // Initialize tracing subscriber with env filter, default info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let cfg = ServerConfig::from_env_and_args(&args);
    println!(
        "minee starting: http={}, static={}, business={}, user={}",
        cfg.http_port,
        cfg.static_root.display(),
        cfg.business_root.display(),
        cfg.user_root.display()
    );
    tracing::info!("Using port: http={}, user_root={}", cfg.http_port, cfg.user_root.display());
    minee::server::run_with_config(cfg, EntityRegistry::new()).await
}
