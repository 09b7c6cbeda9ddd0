pub mod auth;
pub mod ratelimit;
pub mod session;
pub mod store;

pub use auth::{decode_claims, TokenClaims, TokenPair, TokenRefresher};
pub use ratelimit::{LoginDecision, RateDecision, RateLimitEntry, RateLimiter};
pub use session::{Session, SessionController, SessionState, TimerStatus};
pub use store::{keys, FileStore, KeyValueStore, MemoryStore};

#[cfg(test)]
pub(crate) mod testing;
