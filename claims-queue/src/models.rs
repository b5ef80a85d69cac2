use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::classify::{bucket, priority, title_case};

pub const DEFAULT_PATIENT: &str = "Unknown patient";
pub const DEFAULT_FACILITY: &str = "Unassigned";
pub const DEFAULT_CLAIM_TYPE: &str = "Institutional";
pub const DEFAULT_STATUS: &str = "processing";

/// Coarse lifecycle category a claim is shown under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Pending,
    Processing,
    Relayed,
    Rejected,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Pending,
        Bucket::Processing,
        Bucket::Relayed,
        Bucket::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Pending => "pending",
            Bucket::Processing => "processing",
            Bucket::Relayed => "relayed",
            Bucket::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    Elevated,
    Normal,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Urgent => "urgent",
            Priority::Elevated => "elevated",
            Priority::Normal => "normal",
        })
    }
}

/// Bucket selector for the filtered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketFilter {
    #[default]
    All,
    Only(Bucket),
}

impl BucketFilter {
    pub fn matches(&self, bucket: Bucket) -> bool {
        match self {
            BucketFilter::All => true,
            BucketFilter::Only(wanted) => *wanted == bucket,
        }
    }
}

impl fmt::Display for BucketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketFilter::All => f.write_str("all"),
            BucketFilter::Only(bucket) => fmt::Display::fmt(bucket, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown bucket filter: {0}")]
pub struct UnknownBucket(pub String);

impl FromStr for BucketFilter {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(BucketFilter::All),
            "pending" => Ok(BucketFilter::Only(Bucket::Pending)),
            "processing" => Ok(BucketFilter::Only(Bucket::Processing)),
            "relayed" => Ok(BucketFilter::Only(Bucket::Relayed)),
            "rejected" => Ok(BucketFilter::Only(Bucket::Rejected)),
            _ => Err(UnknownBucket(s.to_string())),
        }
    }
}

/// Claim record as returned by the claims API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawClaim {
    #[serde(deserialize_with = "lenient_string")]
    pub claim_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub patient_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub patient_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub facility_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub claim_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub created_at: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub last_update: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub status: Option<String>,
    pub progress: Option<RawProgress>,
    #[serde(deserialize_with = "lenient_f64")]
    pub items_count: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub total_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub ai_risk_score: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub route_used: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawProgress {
    #[serde(deserialize_with = "lenient_f64")]
    pub percentage: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub current_stage: Option<String>,
}

/// Live status of a single claim as returned by the claim-status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimStatusUpdate {
    #[serde(deserialize_with = "lenient_string")]
    pub status: Option<String>,
    pub progress: Option<RawProgress>,
    pub timestamps: Option<StatusTimestamps>,
    #[serde(deserialize_with = "lenient_string")]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusTimestamps {
    #[serde(deserialize_with = "lenient_string")]
    pub last_update: Option<String>,
}

/// Normalised, display-ready claim held in the working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub patient: String,
    pub patient_id: Option<String>,
    pub facility: String,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub status: String,
    pub bucket: Bucket,
    pub progress_percentage: f64,
    pub current_stage: Option<String>,
    pub amount: f64,
    pub ai_risk_score: Option<f64>,
    pub priority: Priority,
    pub items_count: u32,
    pub created_at: Option<String>,
    pub last_update: Option<String>,
    pub route_used: Option<String>,
    pub tracking_url: Option<String>,
}

impl Claim {
    /// Map an API record into the view model. Records without a claim id are rejected.
    pub fn from_raw(raw: RawClaim) -> Option<Self> {
        let id = non_blank(raw.claim_id)?;
        let status = normalize_status(raw.status.as_deref());
        let progress = raw.progress.unwrap_or_default();
        let progress_percentage = clamp_percentage(progress.percentage);
        let ai_risk_score = raw
            .ai_risk_score
            .filter(|score| score.is_finite())
            .map(|score| score.clamp(0.0, 100.0));

        Some(Self {
            bucket: bucket(&status, progress_percentage),
            priority: priority(&status, ai_risk_score),
            patient: non_blank(raw.patient_name).unwrap_or_else(|| DEFAULT_PATIENT.to_string()),
            patient_id: non_blank(raw.patient_id),
            facility: non_blank(raw.facility_id).unwrap_or_else(|| DEFAULT_FACILITY.to_string()),
            claim_type: non_blank(raw.claim_type)
                .map(|t| title_case(&t))
                .unwrap_or_else(|| DEFAULT_CLAIM_TYPE.to_string()),
            progress_percentage,
            current_stage: non_blank(progress.current_stage),
            amount: clamp_amount(raw.total_amount),
            ai_risk_score,
            items_count: raw
                .items_count
                .filter(|n| n.is_finite() && *n > 0.0)
                .map(|n| n.min(u32::MAX as f64) as u32)
                .unwrap_or(0),
            created_at: non_blank(raw.created_at),
            last_update: non_blank(raw.last_update),
            route_used: non_blank(raw.route_used),
            tracking_url: non_blank(raw.tracking_url),
            status,
            id,
        })
    }

    /// Merge a live status response into this claim, recomputing the derived fields.
    pub fn apply_status(&mut self, update: ClaimStatusUpdate) {
        if let Some(status) = update.status.as_deref().filter(|s| !s.trim().is_empty()) {
            self.status = normalize_status(Some(status));
        }
        if let Some(progress) = update.progress {
            if progress.percentage.is_some() {
                self.progress_percentage = clamp_percentage(progress.percentage);
            }
            self.current_stage = non_blank(progress.current_stage);
        }
        if let Some(last_update) = update.timestamps.and_then(|t| non_blank(t.last_update)) {
            self.last_update = Some(last_update);
        }
        if let Some(tracking_url) = non_blank(update.tracking_url) {
            self.tracking_url = Some(tracking_url);
        }
        self.bucket = bucket(&self.status, self.progress_percentage);
        self.priority = priority(&self.status, self.ai_risk_score);
    }

    /// Retry is only offered for claims that ended in a failure status.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status.as_str(), "failed" | "rejected")
    }
}

/// Aggregate bucket counts over the whole working set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub all: usize,
    pub pending: usize,
    pub processing: usize,
    pub relayed: usize,
    pub rejected: usize,
}

impl StatusCounts {
    pub fn get(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Pending => self.pending,
            Bucket::Processing => self.processing,
            Bucket::Relayed => self.relayed,
            Bucket::Rejected => self.rejected,
        }
    }
}

fn normalize_status(status: Option<&str>) -> String {
    match status.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_lowercase(),
        _ => DEFAULT_STATUS.to_string(),
    }
}

fn clamp_percentage(percentage: Option<f64>) -> f64 {
    match percentage {
        Some(p) if p.is_finite() => p.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

fn clamp_amount(amount: Option<f64>) -> f64 {
    match amount {
        Some(a) if a.is_finite() && a > 0.0 => a,
        _ => 0.0,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accept strings, numbers and booleans; anything else becomes absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Accept numbers and numeric strings; anything else becomes absent.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    })
}
