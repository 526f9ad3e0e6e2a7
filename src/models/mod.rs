// src/models/mod.rs

//! Domain models for the screenshot cache.
//!
//! Configuration lives in `config`, the items flowing through the caches in `item`.

mod config;
mod item;

// Re-export all public types
pub use config::{
    BanConfig, CacheConfig, Config, DiskConfig, RateLimitConfig, ServerConfig, UpstreamConfig,
};
pub use item::{
    BAN_NOTICE, DEFAULT_CONTENT_TYPE, DEFAULT_IMAGE_SUFFIX, DiskItem, DiskMeta, ImageSource, Item,
    Payload, Servable, content_type_for_name, extension_for,
};
