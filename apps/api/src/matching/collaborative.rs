//! Collaborative filtering — derives job scores from the interaction
//! history of similar users.
//!
//! Pure functions over a snapshot of `InteractionEvent`s; no I/O. Ordering
//! is fully deterministic: similarity ties break on user id and score ties
//! break on job id, so results are reproducible across runs.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::models::job::InteractionEvent;

/// Neighbors considered per target user.
pub const SIMILAR_USER_K: usize = 10;
/// Maximum recommendations returned.
pub const RECOMMENDATION_K: usize = 20;

/// Implicit user×job rating matrix: cell = sum of event weights for that
/// (user, job) pair. BTreeMaps keep iteration order stable.
fn build_rating_matrix(
    events: &[InteractionEvent],
) -> (BTreeMap<i64, BTreeMap<Uuid, f64>>, BTreeSet<Uuid>) {
    let mut matrix: BTreeMap<i64, BTreeMap<Uuid, f64>> = BTreeMap::new();
    let mut all_jobs: BTreeSet<Uuid> = BTreeSet::new();

    for event in events {
        *matrix
            .entry(event.user_id)
            .or_default()
            .entry(event.job_id)
            .or_insert(0.0) += event.kind.weight();
        all_jobs.insert(event.job_id);
    }

    (matrix, all_jobs)
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Top-K users most similar to the target by cosine similarity over the
/// union of all known job ids (missing entries count as 0). Only users with
/// similarity > 0 are returned.
pub fn similar_users(
    target_user: i64,
    events: &[InteractionEvent],
    top_k: usize,
) -> Vec<(i64, f64)> {
    let (matrix, all_jobs) = build_rating_matrix(events);

    let Some(target_row) = matrix.get(&target_user) else {
        return Vec::new();
    };

    let target_vector: Vec<f64> = all_jobs
        .iter()
        .map(|job| target_row.get(job).copied().unwrap_or(0.0))
        .collect();

    let mut similarities: Vec<(i64, f64)> = matrix
        .iter()
        .filter(|(uid, _)| **uid != target_user)
        .map(|(uid, row)| {
            let vector: Vec<f64> = all_jobs
                .iter()
                .map(|job| row.get(job).copied().unwrap_or(0.0))
                .collect();
            (*uid, cosine_similarity(&target_vector, &vector))
        })
        .filter(|(_, sim)| *sim > 0.0)
        .collect();

    // Descending similarity, user id as the stable secondary key.
    similarities.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    similarities.truncate(top_k);
    similarities
}

/// Recommends jobs the target user has not yet touched, weighted by
/// neighbor interaction strength × neighbor similarity. Returns (job_id,
/// score) pairs sorted descending. Empty interaction history for the target
/// yields an empty result; the caller falls through to content-based only.
pub fn recommend(target_user: i64, events: &[InteractionEvent], top_k: usize) -> Vec<(Uuid, f64)> {
    let neighbors = similar_users(target_user, events, SIMILAR_USER_K);
    if neighbors.is_empty() {
        return Vec::new();
    }
    let similarity_of: BTreeMap<i64, f64> = neighbors.into_iter().collect();

    let interacted: BTreeSet<Uuid> = events
        .iter()
        .filter(|e| e.user_id == target_user)
        .map(|e| e.job_id)
        .collect();

    let mut job_scores: BTreeMap<Uuid, f64> = BTreeMap::new();
    for event in events {
        if interacted.contains(&event.job_id) {
            continue;
        }
        if let Some(similarity) = similarity_of.get(&event.user_id) {
            *job_scores.entry(event.job_id).or_insert(0.0) += event.kind.weight() * similarity;
        }
    }

    let mut scored: Vec<(Uuid, f64)> = job_scores.into_iter().collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::InteractionKind;

    fn event(user_id: i64, job_id: Uuid, kind: InteractionKind) -> InteractionEvent {
        InteractionEvent {
            user_id,
            job_id,
            kind,
        }
    }

    fn job(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_no_history_for_target_yields_empty() {
        let events = vec![event(2, job(1), InteractionKind::Apply)];
        assert!(similar_users(1, &events, 10).is_empty());
        assert!(recommend(1, &events, 20).is_empty());
    }

    #[test]
    fn test_identical_behavior_is_maximally_similar() {
        let events = vec![
            event(1, job(1), InteractionKind::Apply),
            event(1, job(2), InteractionKind::Click),
            event(2, job(1), InteractionKind::Apply),
            event(2, job(2), InteractionKind::Click),
            event(3, job(3), InteractionKind::View),
        ];
        let similar = similar_users(1, &events, 10);
        assert_eq!(similar[0].0, 2);
        assert!((similar[0].1 - 1.0).abs() < 1e-9);
        // User 3 shares no jobs with user 1 → similarity 0 → excluded.
        assert_eq!(similar.len(), 1);
    }

    #[test]
    fn test_similarity_ties_break_on_user_id() {
        // Users 2 and 3 behave identically relative to user 1.
        let events = vec![
            event(1, job(1), InteractionKind::Apply),
            event(3, job(1), InteractionKind::Apply),
            event(2, job(1), InteractionKind::Apply),
        ];
        let similar = similar_users(1, &events, 10);
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].0, 2);
        assert_eq!(similar[1].0, 3);
    }

    #[test]
    fn test_recommend_excludes_already_interacted_jobs() {
        let events = vec![
            event(1, job(1), InteractionKind::Apply),
            event(2, job(1), InteractionKind::Apply),
            event(2, job(2), InteractionKind::Favorite),
        ];
        let recs = recommend(1, &events, 20);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].0, job(2));
        // favorite weight 3.0 × similarity 1.0... similarity over the job
        // union is < 1 here, so just check positivity and exclusion.
        assert!(recs[0].1 > 0.0);
        assert!(!recs.iter().any(|(id, _)| *id == job(1)));
    }

    #[test]
    fn test_stronger_neighbor_signal_scores_higher() {
        let events = vec![
            event(1, job(1), InteractionKind::Apply),
            event(2, job(1), InteractionKind::Apply),
            event(2, job(2), InteractionKind::Apply),
            event(2, job(3), InteractionKind::View),
        ];
        let recs = recommend(1, &events, 20);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].0, job(2)); // apply (5.0) beats view (0.5)
        assert_eq!(recs[1].0, job(3));
        assert!(recs[0].1 > recs[1].1);
    }

    #[test]
    fn test_recommend_is_deterministic() {
        let events = vec![
            event(1, job(5), InteractionKind::Click),
            event(2, job(5), InteractionKind::Click),
            event(2, job(7), InteractionKind::Apply),
            event(3, job(5), InteractionKind::Click),
            event(3, job(9), InteractionKind::Apply),
        ];
        let first = recommend(1, &events, 20);
        let second = recommend(1, &events, 20);
        assert_eq!(first, second);
    }

    #[test]
    fn test_top_k_truncates_neighbors() {
        let mut events = vec![event(1, job(1), InteractionKind::Apply)];
        for uid in 2..20 {
            events.push(event(uid, job(1), InteractionKind::Apply));
        }
        let similar = similar_users(1, &events, SIMILAR_USER_K);
        assert_eq!(similar.len(), SIMILAR_USER_K);
    }
}
