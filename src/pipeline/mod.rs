//! Acquisition and serving orchestration.
//!
//! - `rate_limit`: rolling outbound request quota
//! - `circuit_breaker`: upstream availability (ban) state
//! - `acquire`: random id → validated item
//! - `workers`: producers filling the caches
//! - `resolver`: one item per inbound request

pub mod acquire;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod resolver;
pub mod workers;

pub use acquire::{Acquire, Acquirer};
pub use circuit_breaker::{AvailabilityBreaker, BreakerState};
pub use rate_limit::RateLimiter;
pub use resolver::Resolver;
pub use workers::{Step, WorkerPool};
