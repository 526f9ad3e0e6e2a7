//! Storage tiers for acquired screenshots.
//!
//! - Memory: `memory` - bounded FIFO served inline as data URLs
//! - Disk: `local` - overflow FIFO served as files under `/storage`
//! - Serving: `registry` - disk files claimed for a response but not yet deleted
//!
//! ## Item Lifecycle
//!
//! ```text
//! worker ──push──▶ MemoryCache ──pop──▶ response (inline)
//!    │ (full)
//!    └──save──▶ DiskCache ──load_oldest──▶ ServingRegistry ──stream──▶ mark_served
//! ```

pub mod local;
pub mod memory;
pub mod registry;

// Re-export for convenience
pub use local::DiskCache;
pub use memory::MemoryCache;
pub use registry::{ServingEntry, ServingRegistry};
