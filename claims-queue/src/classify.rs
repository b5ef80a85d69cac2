//! Pure classification rules shared by the mapping and row-refresh paths.

use crate::models::{Bucket, Priority};

/// Progress at or below which a `processing` claim is still shown as pending.
pub const PENDING_PROGRESS_CEILING: f64 = 25.0;
pub const URGENT_RISK_SCORE: f64 = 80.0;
pub const ELEVATED_RISK_SCORE: f64 = 60.0;

/// Derive the bucket of a claim from its raw status and progress.
///
/// Only explicit terminal statuses land in `Relayed`/`Rejected`. An empty status is treated
/// as `processing`, and unknown statuses fall through to `Processing`.
pub fn bucket(status: &str, progress_percentage: f64) -> Bucket {
    let status = status.trim().to_lowercase();
    let status = if status.is_empty() {
        "processing"
    } else {
        status.as_str()
    };

    match status {
        "failed" | "rejected" => Bucket::Rejected,
        "approved" | "completed" | "submitted" => Bucket::Relayed,
        // NaN compares false and falls through to Processing
        "processing" if progress_percentage <= PENDING_PROGRESS_CEILING => Bucket::Pending,
        _ => Bucket::Processing,
    }
}

pub fn priority(status: &str, ai_risk_score: Option<f64>) -> Priority {
    let failed = matches!(status.trim().to_lowercase().as_str(), "failed" | "rejected");
    match ai_risk_score {
        _ if failed => Priority::Urgent,
        Some(score) if score >= URGENT_RISK_SCORE => Priority::Urgent,
        Some(score) if score >= ELEVATED_RISK_SCORE => Priority::Elevated,
        _ => Priority::Normal,
    }
}

/// `"oral_health"` -> `"Oral Health"`, `"INSTITUTIONAL"` -> `"Institutional"`.
pub fn title_case(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
