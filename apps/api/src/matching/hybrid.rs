//! Hybrid merge — combines collaborative and content-based scores into one
//! ranked list. Pure and idempotent: identical inputs always produce the
//! identical ordering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const COLLABORATIVE_WEIGHT: f64 = 0.4;
pub const CONTENT_WEIGHT: f64 = 0.6;

/// Merges the two scorer outputs keyed by job id. Jobs present in only one
/// list keep their partial weighted contribution. Sorted descending; score
/// ties break by creation time (most recent first), then job id.
pub fn merge(
    collaborative: &[(Uuid, f64)],
    content_based: &[(Uuid, f64)],
    created_at: &BTreeMap<Uuid, DateTime<Utc>>,
) -> Vec<(Uuid, f64)> {
    let mut combined: BTreeMap<Uuid, f64> = BTreeMap::new();

    for (job_id, score) in collaborative {
        *combined.entry(*job_id).or_insert(0.0) += score * COLLABORATIVE_WEIGHT;
    }
    for (job_id, score) in content_based {
        *combined.entry(*job_id).or_insert(0.0) += score * CONTENT_WEIGHT;
    }

    let mut merged: Vec<(Uuid, f64)> = combined.into_iter().collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let created_a = created_at.get(&a.0);
                let created_b = created_at.get(&b.0);
                created_b.cmp(&created_a) // most recent first
            })
            .then(a.0.cmp(&b.0))
    });
    merged
}
