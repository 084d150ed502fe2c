// src/lib.rs
pub mod broker;
pub mod cache;
mod handler;
pub mod native;

pub use bytes::Bytes;

pub use handler::{Bridge, BridgeConfig, HandleError, DEFAULT_CACHE_KEY, DEFAULT_TOPIC};
pub use native::{build_router, init_tracing};
