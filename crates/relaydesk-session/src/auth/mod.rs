pub mod claims;
pub mod refresher;

pub use claims::{decode_claims, TokenClaims};
pub use refresher::{TokenPair, TokenRefresher};
