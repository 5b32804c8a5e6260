//! Error taxonomy (see spec §7).
//!
//! The boundary is blunt on purpose: anything that should keep the auction
//! running (a flaky datasource call, a rejected bid) is logged and
//! swallowed at the point it's produced; anything that means the in-memory
//! document and the persisted one can no longer agree is fatal.

use payloads::BidderId;
use thiserror::Error;

/// Startup-time configuration problems. Fatal; the process exits 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to parse config file: {0}")]
    Parse(#[source] serde_yaml::Error),
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),
}

/// The private datasource fetch came back empty and there is no document
/// to fall back on (or the auction was already cancelled).
#[derive(Debug, Error)]
#[error("auction {0} does not exist in the datasource")]
pub struct DatasourceMissing(pub String);

/// Network/5xx/timeout errors from an external collaborator. Retried a
/// bounded number of times inside the datasource; once exhausted this is
/// logged as a warning and the coordinator continues down the
/// "results not approved" / "audit not approved" path.
#[derive(Debug, Error)]
#[error("datasource call failed after retries: {0}")]
pub struct DatasourceTransient(#[from] pub anyhow::Error);

/// The document store rejected a save because the revision we loaded is
/// stale. Should never happen under the single-writer-per-worker
/// assumption (§5); if it does, it means something outside this worker
/// wrote the document, which is a correctness bug, not a recoverable race.
#[derive(Debug, Error)]
#[error("document store rejected save for {doc_id}: revision conflict (had {held_revision})")]
pub struct StoreConflict {
    pub doc_id: String,
    pub held_revision: String,
}

/// A bid failed validation before it ever touched the document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BidValidationError {
    #[error("auction is not in an open bidding stage")]
    WrongStage,
    #[error("bid amount {amount} is below the required floor {floor}")]
    BelowFloor { amount: String, floor: String },
    #[error("bid amount is not a multiple of the minimal step")]
    NotStepMultiple,
    #[error("unknown bidder {0:?}")]
    UnknownBidder(BidderId),
}

impl BidValidationError {
    pub fn as_messages(&self) -> Vec<String> {
        vec![self.to_string()]
    }
}

/// An exception was raised inside `add_bid` after validation passed.
/// Caught at the call site, logged as fatal, and reported to the HTTP
/// client as a failed bid; per spec the in-progress mutation must not be
/// persisted.
#[derive(Debug, Error)]
#[error("unexpected error applying bid: {0}")]
pub struct BidApplyError(#[from] pub anyhow::Error);

/// Everything [`crate::bid_handler::add_bid`] can fail with. Both variants
/// are reported to the HTTP client the same way (`PostBidResponse::Failed`);
/// the distinction matters for logging, since `Apply` means the store, not
/// the bid, rejected the request.
#[derive(Debug, Error)]
pub enum BidError {
    #[error(transparent)]
    Validation(#[from] BidValidationError),
    #[error(transparent)]
    Apply(#[from] BidApplyError),
}

impl BidError {
    pub fn as_messages(&self) -> Vec<String> {
        match self {
            Self::Validation(e) => e.as_messages(),
            Self::Apply(e) => vec![e.to_string()],
        }
    }
}
