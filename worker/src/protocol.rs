//! Audit protocol accumulation (spec §9 "Audit protocol accumulation").
//!
//! The protocol is built up in three separate hooks instead of all at once
//! at the end, so intermediate shapes are assertable from tests the same
//! way the source builds it incrementally: once when the auction starts,
//! once per closed round, and once at announcement.

use payloads::{
    AuctionDocument, AuctionId, AuctionProtocol, BidRecord, InitialBidEntry, ResultBidEntry,
    ResultsEntry, RoundEntry, Timeline,
};

/// Fresh, empty protocol for a newly scheduled auction.
pub fn new_protocol(id: String, auction_id: AuctionId, items: serde_json::Value) -> AuctionProtocol {
    AuctionProtocol { id, auction_id, items, timeline: Timeline::default() }
}

/// Record the opening snapshot: the initial bids, sorted ascending by
/// amount then by bid number, and the time the auction actually started.
pub fn record_initial_bids(
    protocol: &mut AuctionProtocol,
    start_time: jiff::Timestamp,
    initial_bids: &[BidRecord],
) {
    protocol.timeline.auction_start.time = Some(start_time);
    let mut entries: Vec<BidRecord> = initial_bids.to_vec();
    entries.sort_by(|a, b| a.amount.cmp(&b.amount).then(a.bid_number.cmp(&b.bid_number)));
    protocol.timeline.auction_start.initial_bids = entries
        .into_iter()
        .map(|b| InitialBidEntry {
            bidder: b.bidder_id,
            date: b.time,
            amount: b.amount,
            bid_number: b.bid_number,
            identification: b.identification,
            owner: b.owner,
        })
        .collect();
}

/// Record the closing of `stage_index`'s round: `round_{n}` where
/// `n = stage_index / 2 + 1` (stage 0 is the initial pause, stage 1 the
/// first main round, stage 2 the next pause, and so on).
pub fn record_round_close(
    protocol: &mut AuctionProtocol,
    stage_index: i64,
    bidder: payloads::BidderId,
    amount: rust_decimal::Decimal,
    time: jiff::Timestamp,
) {
    let round_number = stage_index / 2 + 1;
    protocol
        .timeline
        .rounds
        .insert(format!("round_{round_number}"), RoundEntry { bidder, amount, time });
}

/// Record the final ledger at announcement time.
pub fn record_results(protocol: &mut AuctionProtocol, time: jiff::Timestamp, results: &[BidRecord]) {
    protocol.timeline.results = Some(ResultsEntry {
        time,
        bids: results
            .iter()
            .cloned()
            .map(|b| ResultBidEntry {
                bidder: b.bidder_id,
                amount: b.amount,
                time: b.time,
                bid_number: b.bid_number,
                identification: b.identification,
                owner: b.owner,
            })
            .collect(),
    });
}

/// Snapshot of `doc.items` to seed a freshly built protocol, kept here so
/// the coordinator doesn't need to know the protocol's field layout.
pub fn items_from_document(doc: &AuctionDocument) -> serde_json::Value {
    doc.items.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use payloads::{BidderId, Label};
    use rust_decimal_macros::dec;

    fn bid_record(id: &str, amount: rust_decimal::Decimal, bid_number: Option<u32>) -> BidRecord {
        BidRecord {
            bidder_id: BidderId(id.into()),
            time: "2026-01-01T09:00:00Z".parse().unwrap(),
            amount,
            label: Label::for_bid_number(bid_number.unwrap_or(1)),
            bid_number,
            owner: None,
            identification: None,
        }
    }

    #[test]
    fn initial_bids_are_sorted_ascending_by_amount_then_number() {
        let mut protocol =
            new_protocol("p1".into(), AuctionId("a1".into()), serde_json::json!([]));
        let bids = vec![
            bid_record("b", dec!(1500), Some(2)),
            bid_record("a", dec!(1000), Some(1)),
        ];
        record_initial_bids(&mut protocol, "2026-01-01T10:00:00Z".parse().unwrap(), &bids);
        let entries = &protocol.timeline.auction_start.initial_bids;
        assert_eq!(entries[0].bidder, BidderId("a".into()));
        assert_eq!(entries[1].bidder, BidderId("b".into()));
    }

    #[test]
    fn round_close_keys_by_stage_pair() {
        let mut protocol =
            new_protocol("p1".into(), AuctionId("a1".into()), serde_json::json!([]));
        record_round_close(
            &mut protocol,
            1,
            BidderId("a".into()),
            dec!(1200),
            "2026-01-01T10:05:00Z".parse().unwrap(),
        );
        assert!(protocol.timeline.rounds.contains_key("round_1"));

        record_round_close(
            &mut protocol,
            3,
            BidderId("b".into()),
            dec!(1400),
            "2026-01-01T10:10:00Z".parse().unwrap(),
        );
        assert!(protocol.timeline.rounds.contains_key("round_2"));
    }
}
