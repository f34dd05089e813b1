use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::payout::PayoutRecord;
use crate::settlement::RunSummary;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub last_run: Option<RunSummary>,
}

/// Body of `POST /api/v1/runs`. No body (or no `as_of`) pays every pending record.
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRunRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct DuePayoutsQuery {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct DuePayoutsResponse {
    pub as_of: Option<NaiveDate>,
    pub count: usize,
    pub payouts: Vec<PayoutRecord>,
}
