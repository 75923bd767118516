pub mod error;
pub mod config;
pub mod registry;
pub mod assets;
pub mod storage;
pub mod sequence;
pub mod scripts;
pub mod hooks;
pub mod engine;
pub mod resolver;
pub mod resource;
pub mod pipeline;
pub mod server;
