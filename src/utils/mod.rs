pub mod benchmark;
pub mod config;
pub mod rate_limit;

pub use benchmark::{BenchmarkResults, BenchmarkTracker, MemorySnapshot};
pub use config::RateLimitConfig;
pub use rate_limit::RateLimiter;
