//! BidsMapping construction: `bidder_id -> small positive integer`.
//!
//! Honours any `bidNumber` the procurement API already assigned; every
//! bidder left without one gets the smallest positive integer not already
//! claimed. The result is injective by construction — no two bidders ever
//! share a number.

use std::collections::BTreeSet;

use payloads::{BidsMapping, ExternalBid};

/// Build a [`BidsMapping`] for the given active bids. Bid order only
/// matters for the fallback assignment: bids are walked in the order
/// given, so ties in "who gets the next free number" go to whoever
/// appears first.
pub fn build_bids_mapping(bids: &[ExternalBid]) -> BidsMapping {
    let mut mapping = BidsMapping::new();
    let mut taken: BTreeSet<u32> = BTreeSet::new();

    for bid in bids {
        if let Some(n) = bid.bid_number {
            mapping.insert(bid.id.clone(), n);
            taken.insert(n);
        }
    }

    let mut next_candidate: u32 = 1;
    for bid in bids {
        if mapping.contains_key(&bid.id) {
            continue;
        }
        while taken.contains(&next_candidate) {
            next_candidate += 1;
        }
        mapping.insert(bid.id.clone(), next_candidate);
        taken.insert(next_candidate);
    }

    mapping
}
