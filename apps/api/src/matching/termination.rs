//! Termination state machine — decides each turn whether enough signal
//! exists to stop asking questions and present results.
//!
//! Pure function of (turn, top match, score history, user message); the
//! turn controller owns all side effects of ending.

use crate::models::session::{EndReason, TurnScore};

/// Conversation phase, derived from the turn number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// Turns 1-4: gathering basics; never ends on score.
    Collecting,
    /// Turns 5-7: may end on high match (≥75%) or convergence.
    Evaluating,
    /// Turns 8-9: thresholds loosen (≥70%, tighter convergence window).
    Finalizing,
    /// Turn ≥10: always ends.
    Forced,
}

impl ConversationPhase {
    pub fn for_turn(turn: u32) -> Self {
        match turn {
            0..=4 => ConversationPhase::Collecting,
            5..=7 => ConversationPhase::Evaluating,
            8..=9 => ConversationPhase::Finalizing,
            _ => ConversationPhase::Forced,
        }
    }

    pub fn stage_label(self) -> &'static str {
        match self {
            ConversationPhase::Collecting => "基本情報収集中",
            ConversationPhase::Evaluating => "詳細情報深掘り中",
            ConversationPhase::Finalizing => "最終調整中",
            ConversationPhase::Forced => "最終提案",
        }
    }
}

const RESULT_REQUEST_KEYWORDS: &[&str] = &[
    "結果を見せて",
    "結果が見たい",
    "もう決め",
    "提案して",
    "おすすめを教えて",
    "求人を見せて",
    "もう十分",
];

/// Keyword trigger for "show me the results now".
pub fn wants_results(message: &str) -> bool {
    RESULT_REQUEST_KEYWORDS.iter().any(|kw| message.contains(kw))
}

/// Returns `Some(reason)` when the conversation should end after this turn.
///
/// `turn` is the post-increment turn number of the message being processed,
/// so it is always ≥ 1 here: one real exchange is the hard floor for the
/// user-requested exit.
pub fn decide(
    turn: u32,
    top_match_percentage: f64,
    score_history: &[TurnScore],
    user_message: &str,
) -> Option<EndReason> {
    if turn >= 1 && wants_results(user_message) {
        return Some(EndReason::UserRequested);
    }

    match ConversationPhase::for_turn(turn) {
        ConversationPhase::Collecting => None,
        ConversationPhase::Evaluating => {
            if top_match_percentage >= 75.0 {
                return Some(EndReason::HighMatch);
            }
            // Convergence: last 3 recorded top-scores each moved ≤3 points.
            if turn >= 6 && converged(score_history, 3, 3.0) {
                return Some(EndReason::ScoreConverged);
            }
            None
        }
        ConversationPhase::Finalizing => {
            if top_match_percentage >= 70.0 {
                return Some(EndReason::HighMatch);
            }
            if converged(score_history, 2, 2.0) {
                return Some(EndReason::ScoreConverged);
            }
            None
        }
        ConversationPhase::Forced => Some(EndReason::MaxTurns),
    }
}

/// True when the last `window` recorded top-scores each differ from their
/// predecessor by at most `tolerance`.
fn converged(history: &[TurnScore], window: usize, tolerance: f64) -> bool {
    if history.len() < window {
        return false;
    }
    let recent = &history[history.len() - window..];
    recent
        .windows(2)
        .all(|pair| (pair[1].top_score - pair[0].top_score).abs() <= tolerance)
}
