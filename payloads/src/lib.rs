//! Wire types shared between the auction worker's HTTP surface, its
//! document store, and anything that needs to talk to either without
//! depending on `worker`'s internals.
//!
//! Mirrors the split the rest of the workspace uses: storage/business logic
//! lives next to the thing that owns it, the shapes that cross a process
//! boundary live here.

pub mod requests;
pub mod responses;

use std::collections::BTreeMap;

use derive_more::Display;
use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Languages stages/results/labels are duplicated into, beyond the base field.
pub const ADDITIONAL_LANGUAGES: &[&str] = &["en", "ru"];
/// Document fields that get a `{field}_{lang}` sibling for each of
/// [`ADDITIONAL_LANGUAGES`].
pub const MULTILINGUAL_FIELDS: &[&str] = &["title", "description"];

pub const DEFAULT_AUCTION_TYPE: &str = "texas";

/// `current_stage` sentinel: planned, but the start-of-auction job hasn't
/// fired yet.
pub const STAGE_PLANNED: i64 = -1;
/// `current_stage` sentinel: the auction was cancelled before completion.
pub const STAGE_CANCELLED: i64 = -100;
/// `current_stage` sentinel: the auction couldn't fit before its deadline
/// and needs to be replanned with a later start date.
pub const STAGE_RESCHEDULED: i64 = -101;

/// External identifier for the tender/auction this worker is running,
/// as handed out by the procurement API. Not a UUID in general.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
pub struct AuctionId(pub String);

/// Identifier of a bidder, as assigned by the procurement API.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
pub struct BidderId(pub String);

/// An opaque optimistic-concurrency token handed back by the document
/// store. Callers never construct or parse it, only round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub struct Revision(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalStep {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuctionPeriod {
    pub start_date: Option<Timestamp>,
    pub end_date: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Pause,
    MainRound,
    Preannouncement,
    End,
}

/// Public display label for a bidder, mirroring the three languages the
/// source auction module always shows alongside a bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub en: String,
    pub uk: String,
    pub ru: String,
}

impl Label {
    /// `"Bidder #{n}"` in each of the three supported languages.
    pub fn for_bid_number(n: u32) -> Self {
        Self {
            en: format!("Bidder #{n}"),
            uk: format!("Учасник №{n}"),
            ru: format!("Участник №{n}"),
        }
    }
}

/// A single cell of the auction timeline.
///
/// Index 0 is always the initial pause; `MAIN_ROUND`/`PAUSE` alternate
/// after that, with a final `END` stage appended on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub kind: StageKind,
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub planned_end: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<Decimal>,
    /// Set once a bid has been accepted into this stage. `None` means the
    /// round is still open (the source uses the sentinel `time: ""`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bidder_id: Option<BidderId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bid_number: Option<u32>,
}

impl Stage {
    pub fn pause(start: Timestamp) -> Self {
        Self {
            kind: StageKind::Pause,
            start,
            planned_end: None,
            amount: None,
            time: None,
            bidder_id: None,
            label: None,
            bid_number: None,
        }
    }

    pub fn end(start: Timestamp) -> Self {
        Self {
            kind: StageKind::End,
            start,
            planned_end: None,
            amount: None,
            time: None,
            bidder_id: None,
            label: None,
            bid_number: None,
        }
    }

    pub fn preannouncement(start: Timestamp) -> Self {
        Self {
            kind: StageKind::Preannouncement,
            start,
            planned_end: None,
            amount: None,
            time: None,
            bidder_id: None,
            label: None,
            bid_number: None,
        }
    }

    pub fn is_open_main_round(&self) -> bool {
        self.kind == StageKind::MainRound && self.time.is_none()
    }
}

/// A per-bidder accepted bid, as recorded in `results` or `initial_bids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub bidder_id: BidderId,
    pub time: Timestamp,
    pub amount: Decimal,
    pub label: Label,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bid_number: Option<u32>,
    /// The bidder's real identity, opened up once `post_results` comes back
    /// approved (spec §4.3/§4.6 "End"). `None` for the duration of live
    /// bidding, when only the pseudonymous [`Label`] is shown.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identification: Option<serde_json::Value>,
}

/// Deterministic `bidder_id -> small positive integer` assignment used for
/// public labels. Honours any `bidNumber` the procurement API already
/// assigned; otherwise picks the smallest unused positive integer.
pub type BidsMapping = BTreeMap<BidderId, u32>;

/// Transient input to the bid handler; never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidInput {
    pub bidder_id: BidderId,
    pub amount: Decimal,
    pub time: Timestamp,
}

/// The persisted, single source of truth for one auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionDocument {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub revision: Option<Revision>,
    pub auction_id: AuctionId,
    pub procurement_method_type: String,
    pub api_version: String,
    pub value: Value,
    pub minimal_step: MinimalStep,
    pub initial_value: Decimal,
    pub stages: Vec<Stage>,
    pub current_stage: i64,
    pub initial_bids: Vec<BidRecord>,
    pub results: Vec<BidRecord>,
    pub auction_period: AuctionPeriod,
    #[serde(default)]
    pub submission_method_details: String,
    #[serde(default)]
    pub standalone: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
    pub auction_type: String,
    pub procuring_entity: serde_json::Value,
    pub items: serde_json::Value,
    /// `title`/`description` and their `_en`/`_ru` siblings, see
    /// [`MULTILINGUAL_FIELDS`]/[`ADDITIONAL_LANGUAGES`].
    #[serde(flatten)]
    pub multilingual: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_date: Option<Timestamp>,
}

impl AuctionDocument {
    /// `None` for a fresh sandbox auction with no prior stored document.
    pub fn multilingual_field(&self, field: &str, lang: Option<&str>) -> Option<&str> {
        let key = match lang {
            Some(l) => format!("{field}_{l}"),
            None => field.to_string(),
        };
        self.multilingual.get(&key).map(|s| s.as_str())
    }
}

/// The YAML-serialisable audit trail, uploaded to the datasource alongside
/// the final results.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuctionProtocol {
    pub id: String,
    pub auction_id: AuctionId,
    pub items: serde_json::Value,
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Timeline {
    pub auction_start: AuctionStart,
    /// `round_1`, `round_2`, ... one per closed `MAIN_ROUND` stage.
    #[serde(flatten)]
    pub rounds: BTreeMap<String, RoundEntry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub results: Option<ResultsEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuctionStart {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time: Option<Timestamp>,
    pub initial_bids: Vec<InitialBidEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialBidEntry {
    pub bidder: BidderId,
    pub date: Timestamp,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bid_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identification: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEntry {
    pub bidder: BidderId,
    pub amount: Decimal,
    pub time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsEntry {
    pub time: Timestamp,
    pub bids: Vec<ResultBidEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBidEntry {
    pub bidder: BidderId,
    pub amount: Decimal,
    pub time: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bid_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identification: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
}

/// Canonical definition of the auction, as read from the datasource. Bid
/// entries that fail `status == "active"` filtering are dropped before this
/// ever reaches the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionData {
    #[serde(rename = "auctionID")]
    pub auction_id: AuctionId,
    pub procurement_method_type: String,
    pub value: Value,
    pub minimal_step: MinimalStep,
    pub auction_period: AuctionPeriod,
    #[serde(default)]
    pub submission_method_details: String,
    #[serde(default)]
    pub standalone: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
    pub procuring_entity: serde_json::Value,
    pub items: serde_json::Value,
    #[serde(flatten)]
    pub multilingual: BTreeMap<String, String>,
    #[serde(default)]
    pub bids: Vec<ExternalBid>,
}

/// One bid entry as reported by the procurement API. `status` gates
/// whether it participates at all; a withdrawn bidder is kept out of
/// `bidders_data` entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalBid {
    pub id: BidderId,
    #[serde(default = "default_active")]
    pub status: String,
    pub date: Timestamp,
    pub value: Value,
    #[serde(default)]
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bid_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tenderers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub participation_url: Option<String>,
}

impl ExternalBid {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

fn default_active() -> String {
    "active".to_string()
}

/// Generic `{"data": ...}` envelope the procurement API wraps every request
/// and response body in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}
