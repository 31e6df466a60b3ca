use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matching::insights::ExtractedInsight;
use crate::models::job::{JobCandidate, ScoreDetail};

/// Why a conversation ended. Serialized snake_case into session summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HighMatch,
    ScoreConverged,
    UserRequested,
    MaxTurns,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::HighMatch => "high_match",
            EndReason::ScoreConverged => "score_converged",
            EndReason::UserRequested => "user_requested",
            EndReason::MaxTurns => "max_turns",
        }
    }
}

/// The top candidate's score after one turn, kept in order for the
/// convergence check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TurnScore {
    pub turn: u32,
    pub top_score: f64,
    pub top_match_percentage: f64,
}

/// One continuous multi-turn conversation tied to one user and one working
/// candidate set. Owned exclusively by its session id; the turn controller
/// is the sole mutator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub user_id: i64,
    /// Starts at 0, incremented exactly once per processed user message.
    pub turn_number: u32,
    pub score_history: Vec<TurnScore>,
    pub candidates: Vec<JobCandidate>,
    pub insights: ExtractedInsight,
    pub end_reason: Option<EndReason>,
    /// Top-5 job ids captured when the session is sealed.
    pub presented_job_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(user_id: i64, candidates: Vec<JobCandidate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            turn_number: 0,
            score_history: Vec::new(),
            candidates,
            insights: ExtractedInsight::default(),
            end_reason: None,
            presented_job_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_reason.is_some()
    }

    /// Highest-scored candidate, assuming `candidates` is kept sorted
    /// descending after each rescoring pass.
    pub fn top_candidate(&self) -> Option<&JobCandidate> {
        self.candidates.first()
    }

    pub fn record_turn_score(&mut self) {
        if let Some(top) = self.top_candidate() {
            self.score_history.push(TurnScore {
                turn: self.turn_number,
                top_score: top.score,
                top_match_percentage: top.match_percentage,
            });
        }
    }

    /// Marks the session terminal. Sealed sessions are never reused; a new
    /// search starts a fresh session.
    pub fn seal(&mut self, reason: EndReason, presented: Vec<Uuid>) {
        self.end_reason = Some(reason);
        self.presented_job_ids = presented;
    }
}

/// Immutable audit row: one candidate's score at one turn. Never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub session_id: Uuid,
    pub turn_number: u32,
    pub job_id: Uuid,
    pub score: f64,
    pub match_percentage: f64,
    pub score_details: Vec<ScoreDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_at_turn_zero() {
        let session = ConversationSession::new(1, vec![]);
        assert_eq!(session.turn_number, 0);
        assert!(session.score_history.is_empty());
        assert!(!session.is_ended());
    }

    #[test]
    fn test_seal_marks_session_terminal() {
        let mut session = ConversationSession::new(1, vec![]);
        let job_id = Uuid::new_v4();
        session.seal(EndReason::MaxTurns, vec![job_id]);
        assert!(session.is_ended());
        assert_eq!(session.end_reason, Some(EndReason::MaxTurns));
        assert_eq!(session.presented_job_ids, vec![job_id]);
    }

    #[test]
    fn test_end_reason_serializes_snake_case() {
        let json = serde_json::to_string(&EndReason::ScoreConverged).unwrap();
        assert_eq!(json, r#""score_converged""#);
        assert_eq!(EndReason::MaxTurns.as_str(), "max_turns");
    }

    #[test]
    fn test_record_turn_score_without_candidates_is_noop() {
        let mut session = ConversationSession::new(1, vec![]);
        session.turn_number = 1;
        session.record_turn_score();
        assert!(session.score_history.is_empty());
    }
}
