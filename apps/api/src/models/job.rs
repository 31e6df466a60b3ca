use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote work policy advertised by a posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    Full,
    Hybrid,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySize {
    Small,
    Medium,
    Large,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OvertimeLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionSpeed {
    Fast,
    Normal,
    Slow,
    #[default]
    Unknown,
}

/// Multi-axis attributes of a posting, matched against accumulated
/// preferences during filtering and rescoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobAttributes {
    pub remote: RemotePolicy,
    pub flex_time: bool,
    pub side_job: bool,
    pub overtime: OvertimeLevel,
    pub company_size: CompanySize,
    pub training: bool,
    pub growth_opportunities: bool,
    pub promotion_speed: PromotionSpeed,
    /// Free-text skill/tech summary, searched for learning-interest keywords.
    #[serde(default)]
    pub skills_text: String,
}

/// One (label, delta) pair explaining why points were added to a candidate.
/// Kept for explainability only; scores are never re-derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreDetail {
    pub label: String,
    pub delta: f64,
}

impl ScoreDetail {
    pub fn new(label: impl Into<String>, delta: f64) -> Self {
        Self {
            label: label.into(),
            delta,
        }
    }
}

/// A job posting under consideration within one conversation session.
///
/// `score` and `match_percentage` are session-local mutable state; the rest
/// mirrors the posting as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCandidate {
    pub id: Uuid,
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub salary_min: i64,
    pub salary_max: i64,
    pub attributes: JobAttributes,
    pub created_at: DateTime<Utc>,
    /// Current conversational score, clamped to [0, 100].
    pub score: f64,
    /// Deterministic function of `score`; see `matching::rescoring`.
    pub match_percentage: f64,
    pub score_details: Vec<ScoreDetail>,
}

impl JobCandidate {
    /// Combined title + skills text used for keyword lookups.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.attributes.skills_text).to_lowercase()
    }
}

/// Kinds of recorded user-job interactions, ordered by signal strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Click,
    View,
    Favorite,
    Apply,
}

impl InteractionKind {
    /// Implicit rating weight used by the collaborative scorer.
    pub fn weight(self) -> f64 {
        match self {
            InteractionKind::Apply => 5.0,
            InteractionKind::Favorite => 3.0,
            InteractionKind::Click => 1.0,
            InteractionKind::View => 0.5,
        }
    }
}

/// Append-only record of one user-job interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: i64,
    pub job_id: Uuid,
    pub kind: InteractionKind,
}
