//! External classification: fingerprinting, caching, rate limiting and the
//! retrying client that ties them together.

pub mod cache;
pub mod client;
pub mod fingerprint;
pub mod prompt;
pub mod rate_limit;
pub mod types;

pub use cache::{CacheConfig, CacheEntry, CacheStats, ResponseCache, connect_cache, spawn_sweeper};
pub use client::{ClassificationClient, ClientSettings, ClientStats, RetryPolicy};
pub use fingerprint::Fingerprint;
pub use rate_limit::RateLimiter;
pub use types::{ClassificationResult, Label, ResultSource};
