//! Rescoring engine — recomputes every candidate's score from the neutral
//! baseline using the full accumulated insight state.
//!
//! Rescoring is idempotent by construction: deltas are applied fresh from
//! the baseline of 50 each pass, never on top of the previous turn's
//! already-adjusted score, so scores cannot drift across turns.

use tracing::error;

use crate::matching::insights::ExtractedInsight;
use crate::models::job::{CompanySize, JobCandidate, OvertimeLevel, RemotePolicy, ScoreDetail};

/// Neutral starting score for every candidate.
pub const BASELINE_SCORE: f64 = 50.0;
/// Scores at or below this floor map to 0% match.
const SCORE_FLOOR: f64 = 30.0;
const SCORE_CEILING: f64 = 100.0;

/// Deterministic, monotonic mapping from score to match percentage:
/// 30 → 0%, 100 → 100%, clamped on both ends.
pub fn match_percentage(score: f64) -> f64 {
    (((score - SCORE_FLOOR) / (SCORE_CEILING - SCORE_FLOOR)) * 100.0).clamp(0.0, 100.0)
}

/// Rescores a single candidate from the baseline. Score details are rebuilt
/// from scratch so they always explain the current score, not a history of
/// adjustments.
pub fn rescore_candidate(job: &mut JobCandidate, insights: &ExtractedInsight) {
    let mut score = BASELINE_SCORE;
    let mut details = vec![ScoreDetail::new("基本スコア", BASELINE_SCORE)];
    let search_text = job.search_text();

    // リモートワーク条件
    if let Some(remote_pref) = insights.preference("remote_work") {
        let strong = remote_pref == "強く希望";
        if strong || remote_pref == "希望" {
            let (label, delta) = match job.attributes.remote {
                RemotePolicy::Full => ("完全リモート可", 20.0),
                RemotePolicy::Hybrid => ("一部リモート可", 10.0),
                RemotePolicy::None if strong => ("リモート不可", -8.0),
                RemotePolicy::None => ("リモート不可", -3.0),
            };
            score += delta;
            details.push(ScoreDetail::new(label, delta));
        }
    }

    // 学習興味
    if let Some(interest) = insights.preference("learning_interest") {
        if !interest.is_empty() && search_text.contains(&interest.to_lowercase()) {
            score += 8.0;
            details.push(ScoreDetail::new(format!("{interest}使用"), 8.0));
        }
    }

    // 代替条件として受け入れた勤務時間の柔軟性
    if insights.preference("flexible_hours").is_some() && job.attributes.flex_time {
        score += 6.0;
        details.push(ScoreDetail::new("フレックスタイム", 6.0));
    }

    // ワークライフバランス重視 → 残業少なめ
    if insights.preference("work_life_balance") == Some("重視")
        && job.attributes.overtime == OvertimeLevel::Low
    {
        score += 5.0;
        details.push(ScoreDetail::new("残業少なめ", 5.0));
    }

    // 暗黙の価値観（1-5の優先度が4以上で加点）
    if insights.priority("career_growth_priority") >= 4 && job.attributes.growth_opportunities {
        score += 6.0;
        details.push(ScoreDetail::new("成長機会あり", 6.0));
    }
    if insights.priority("stability_priority") >= 4
        && job.attributes.company_size == CompanySize::Large
    {
        score += 4.0;
        details.push(ScoreDetail::new("安定した大手企業", 4.0));
    }

    // キーワードマッチ
    for keyword in &insights.keywords {
        if !keyword.is_empty() && search_text.contains(&keyword.to_lowercase()) {
            score += 3.0;
            details.push(ScoreDetail::new(format!("キーワード「{keyword}」"), 3.0));
        }
    }

    job.score = sanitize(score);
    job.match_percentage = match_percentage(job.score);
    job.score_details = details;
}

/// Rescores the whole working set and sorts it descending (score, then job
/// id for stability).
pub fn rescore_all(candidates: &mut [JobCandidate], insights: &ExtractedInsight) {
    for job in candidates.iter_mut() {
        rescore_candidate(job, insights);
    }
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
}

/// Clamps into [0, 100]. A non-finite score is an internal invariant
/// failure: logged and reset to the neutral baseline, never propagated.
fn sanitize(score: f64) -> f64 {
    if !score.is_finite() {
        error!(score, "score clamp violation, resetting to baseline");
        return BASELINE_SCORE;
    }
    score.clamp(0.0, SCORE_CEILING)
}
