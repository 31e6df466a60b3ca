//! Insight accumulation — merges per-turn extracted signals into the
//! running preference state that drives filtering and rescoring.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// The merged, running preference state for one session. This is the single
/// source of truth consumed by content-based filtering and rescoring; it is
/// never discarded mid-session.
///
/// `Default` yields the degraded value used when extraction fails: empty
/// collections and confidence 0.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInsight {
    /// Stated conditions, e.g. `remote_work → "強く希望"`. Last write wins.
    #[serde(default)]
    pub explicit_preferences: BTreeMap<String, String>,
    /// Inferred priorities on a 1-5 scale. Last write wins.
    #[serde(default)]
    pub implicit_values: BTreeMap<String, u8>,
    /// Stated frustrations. Grows monotonically (set union, no decay).
    #[serde(default)]
    pub pain_points: BTreeSet<String>,
    /// Salient keywords. Grows monotonically (set union, no decay).
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    /// Extractor confidence for the *latest* turn; replaced, not merged.
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractedInsight {
    /// Folds one turn's extraction into the accumulated state.
    ///
    /// Maps are shallow-merged with the newest values overwriting same-key
    /// priors; sets are unioned; confidence is replaced.
    pub fn merge(&mut self, newer: ExtractedInsight) {
        self.explicit_preferences.extend(newer.explicit_preferences);
        self.implicit_values.extend(newer.implicit_values);
        self.pain_points.extend(newer.pain_points);
        self.keywords.extend(newer.keywords);
        self.confidence = newer.confidence;
    }

    pub fn preference(&self, key: &str) -> Option<&str> {
        self.explicit_preferences.get(key).map(String::as_str)
    }

    pub fn priority(&self, key: &str) -> u8 {
        self.implicit_values.get(key).copied().unwrap_or(0)
    }
}

/// Mid-conversation candidate-set mutation requested by the user, decoded
/// once from the extractor output and dispatched via pattern matching.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateAction {
    None,
    /// "エンジニアも見たい" — run a fresh search per title and append.
    CategoryExpansion(Vec<String>),
    /// The user accepted a suggested trade-off, e.g. flexible start time
    /// instead of full remote.
    AlternativeAccepted { kind: String, details: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobChangeRequest {
    #[serde(default)]
    pub requested: bool,
    #[serde(default)]
    pub new_job_titles: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlternativeAcceptance {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub condition_type: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub reason: String,
}

/// Raw structured output of the external intent extractor. Every field has
/// a serde default so a partially-formed LLM response still deserializes;
/// a fully malformed one is handled upstream by falling back to
/// `RawExtraction::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub explicit_preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub implicit_values: BTreeMap<String, u8>,
    #[serde(default)]
    pub pain_points: BTreeSet<String>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub job_change_request: JobChangeRequest,
    #[serde(default)]
    pub alternative_condition_acceptance: AlternativeAcceptance,
}

impl RawExtraction {
    /// Splits the raw extractor output into the mergeable insight delta and
    /// the (at most one) candidate-set action it carries.
    pub fn decode(self) -> (ExtractedInsight, CandidateAction) {
        let action = if self.job_change_request.requested
            && !self.job_change_request.new_job_titles.is_empty()
        {
            CandidateAction::CategoryExpansion(self.job_change_request.new_job_titles.clone())
        } else if self.alternative_condition_acceptance.accepted {
            CandidateAction::AlternativeAccepted {
                kind: self.alternative_condition_acceptance.condition_type.clone(),
                details: self.alternative_condition_acceptance.details.clone(),
            }
        } else {
            CandidateAction::None
        };

        let insight = ExtractedInsight {
            explicit_preferences: self.explicit_preferences,
            implicit_values: self.implicit_values,
            pain_points: self.pain_points,
            keywords: self.keywords,
            confidence: self.confidence,
        };

        (insight, action)
    }
}
