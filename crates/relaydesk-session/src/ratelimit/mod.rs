pub mod entry;
pub mod limiter;

pub use entry::RateLimitEntry;
pub use limiter::{LoginDecision, RateDecision, RateLimiter};
