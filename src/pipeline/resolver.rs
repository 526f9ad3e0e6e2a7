// src/pipeline/resolver.rs

//! Serving-path entry point: memory, then disk, then an on-demand fetch.

use std::sync::Arc;

use crate::error::ServeError;
use crate::models::Servable;
use crate::pipeline::Acquire;
use crate::storage::{DiskCache, MemoryCache};

/// Resolves one servable item per inbound request.
pub struct Resolver {
    acquire: Arc<dyn Acquire>,
    memory: Arc<MemoryCache>,
    disk: Arc<DiskCache>,
}

impl Resolver {
    pub fn new(acquire: Arc<dyn Acquire>, memory: Arc<MemoryCache>, disk: Arc<DiskCache>) -> Self {
        Self {
            acquire,
            memory,
            disk,
        }
    }

    /// Produce one item for a caller.
    ///
    /// A disk-backed result has already been claimed: the caller must end up
    /// calling `DiskCache::mark_served` for its file.
    pub async fn resolve(&self) -> Result<Servable, ServeError> {
        if let Some(item) = self.memory.pop().await {
            log::info!(
                "[cache] serving from memory id={}, remaining={}",
                item.id,
                self.memory.len().await
            );
            return Ok(Servable::Inline(item));
        }

        if let Some(item) = self.disk.load_oldest().await {
            log::info!("[disk] serving from disk id={}", item.id);
            return Ok(Servable::Disk(item));
        }

        // A synchronous fetch would only queue behind the cooldown
        if self.acquire.is_banned().await {
            return Err(ServeError::Unavailable { banned: true });
        }

        log::info!("[cache] caches empty, fetching on demand");
        match self.acquire.fetch_one_valid().await {
            Ok(item) => Ok(Servable::Inline(item)),
            Err(e) => {
                log::warn!("[fail] on-demand fetch failed: {}", e);
                Err(ServeError::Unavailable {
                    banned: e.is_ban_signal() || self.acquire.is_banned().await,
                })
            }
        }
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<DiskCache> {
        &self.disk
    }

    pub fn acquire(&self) -> &Arc<dyn Acquire> {
        &self.acquire
    }
}
