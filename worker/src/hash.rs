//! Participation-URL hashing.
//!
//! Each bidder's private participation link embeds a hash of their bidder id
//! and a shared secret, so the URL itself authenticates the bidder without a
//! separate lookup. `calculate_hash(bidder_id, secret)` must be stable across
//! runs for a given `(bidder_id, secret)` pair — any bidder who lost their
//! link needs the same hash regenerated on request.

use sha2::{Digest, Sha256};

pub fn calculate_hash(bidder_id: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bidder_id.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
