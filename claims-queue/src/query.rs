use crate::models::{Bucket, BucketFilter, Claim, StatusCounts};

/// Claims passing the bucket filter and the search query, in working-set order.
///
/// The query is trimmed and matched case-insensitively as a substring of the claim id,
/// patient name, facility or patient id. An empty query matches everything.
pub fn filter_claims(claims: &[Claim], filter: BucketFilter, query: &str) -> Vec<Claim> {
    let needle = query.trim().to_lowercase();
    claims
        .iter()
        .filter(|claim| filter.matches(claim.bucket))
        .filter(|claim| needle.is_empty() || matches_search(claim, &needle))
        .cloned()
        .collect()
}

fn matches_search(claim: &Claim, needle: &str) -> bool {
    let candidates = [
        Some(claim.id.as_str()),
        Some(claim.patient.as_str()),
        Some(claim.facility.as_str()),
        claim.patient_id.as_deref(),
    ];
    candidates
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

pub fn status_counts(claims: &[Claim]) -> StatusCounts {
    claims
        .iter()
        .fold(StatusCounts::default(), |mut counts, claim| {
            counts.all += 1;
            match claim.bucket {
                Bucket::Pending => counts.pending += 1,
                Bucket::Processing => counts.processing += 1,
                Bucket::Relayed => counts.relayed += 1,
                Bucket::Rejected => counts.rejected += 1,
            }
            counts
        })
}
