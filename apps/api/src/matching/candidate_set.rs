//! Candidate set manager — applies the two mid-conversation mutations the
//! extractor can request. Both are additive or narrowing only; neither ever
//! touches the session's score history.

use tracing::info;

use crate::matching::insights::ExtractedInsight;
use crate::matching::rescoring::BASELINE_SCORE;
use crate::models::job::{JobCandidate, ScoreDetail};

/// Jobs fetched per expansion title.
pub const EXPANSION_FETCH_LIMIT: usize = 40;

/// Appends newly fetched jobs for a category expansion, skipping any id
/// already in the working set. New arrivals enter at the neutral baseline
/// and get their real score on the next rescoring pass. Returns how many
/// were added.
pub fn expand_candidates(candidates: &mut Vec<JobCandidate>, new_jobs: Vec<JobCandidate>) -> usize {
    let mut added = 0;
    for mut job in new_jobs {
        if candidates.iter().any(|existing| existing.id == job.id) {
            continue;
        }
        job.score = BASELINE_SCORE;
        job.match_percentage = 0.0;
        job.score_details = vec![ScoreDetail::new("基本スコア", BASELINE_SCORE)];
        candidates.push(job);
        added += 1;
    }
    if added > 0 {
        info!(added, total = candidates.len(), "candidate set expanded");
    }
    added
}

/// Records an accepted trade-off as a regular explicit preference plus its
/// underlying keyword, so filtering and rescoring pick it up on the next
/// turn without special-casing.
pub fn accept_alternative(insights: &mut ExtractedInsight, kind: &str, details: &str) {
    if kind == "work_hours" && !details.is_empty() {
        insights
            .explicit_preferences
            .insert("flexible_hours".to_string(), details.to_string());
        insights.keywords.insert("フレックス".to_string());
        info!(details, "accepted flexible-hours alternative");
    }
}
