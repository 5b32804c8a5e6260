//! Bodies returned by the worker's HTTP bid server.

use serde::{Deserialize, Serialize};

use crate::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PostBidResponse {
    Ok { data: Stage },
    Failed { errors: Vec<String> },
}
