pub mod claims;
pub mod lifecycle;

pub use claims::{decode_claims, AccessClaims};
pub use lifecycle::{expires_within, is_expired, now_secs, TokenLifecycle};
