//! Bodies accepted by the worker's HTTP bid server.

use crate::BidderId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostBid {
    pub bidder_id: BidderId,
    pub bid: Decimal,
}
