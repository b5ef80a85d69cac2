use claims_queue::{Claim, StatusCounts};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct QueueQuery {
    pub bucket: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub bucket: Option<String>,
    pub q: Option<String>,
    pub dialect: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RowActionResponse {
    pub claim_id: String,
    pub outcome: String,
    pub claim: Option<Claim>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub counts: StatusCounts,
    pub filtered: usize,
}
