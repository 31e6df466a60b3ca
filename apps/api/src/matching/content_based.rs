//! Content-based filtering — matches candidates directly against the
//! user's baseline and the accumulated free-text preferences.
//!
//! The load-bearing rule here is the Neutral policy: an ambiguous answer
//! ("どちらでも", "こだわらない") must apply NO filter. Only explicitly
//! positive or negative phrasing narrows the candidate set; otherwise
//! ambiguous users silently lose valid candidates.

use std::collections::BTreeSet;

use tracing::warn;
use uuid::Uuid;

use crate::matching::insights::ExtractedInsight;
use crate::models::job::{CompanySize, JobCandidate, OvertimeLevel, PromotionSpeed, RemotePolicy};
use crate::models::user::UserBaseline;

/// Hard constraints from the baseline. Unlike preferences these never come
/// from free text.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub titles: Vec<String>,
    pub locations: Vec<String>,
    pub salary_min: i64,
}

impl SearchCriteria {
    pub fn from_baseline(baseline: &UserBaseline) -> Self {
        Self {
            titles: baseline.titles(),
            locations: baseline.locations(),
            salary_min: baseline.min_salary,
        }
    }

    /// Criteria for a mid-conversation category expansion: title only.
    pub fn title_only(title: &str) -> Self {
        Self {
            titles: vec![title.to_string()],
            locations: Vec::new(),
            salary_min: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Large,
    SmallOrMedium,
}

/// Positive-only attribute filters derived from accumulated insights.
/// `None` on a tri-state axis means "do not filter" (the Neutral policy).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceFilter {
    pub remote: Option<bool>,
    pub flex_time: Option<bool>,
    pub side_job: Option<bool>,
    pub training: Option<bool>,
    pub growth: Option<bool>,
    pub company_size: Option<SizeClass>,
    pub overtime_low: bool,
    pub promotion_fast: bool,
}

const POSITIVE_KEYWORDS: &[&str] = &[
    "はい", "yes", "する", "希望", "いいです", "いい", "良い", "がいい", "できる", "可能",
    "したい", "ある", "あり", "魅力的", "大切", "優先", "したほうが", "興味",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "いいえ", "no", "しない", "希望しない", "不要", "なくても", "大丈夫", "考えない",
    "重視しない", "できなくても", "ない", "ないです", "興味ない",
];

const NEUTRAL_KEYWORDS: &[&str] = &[
    "オプション", "どちらでも", "こだわらない", "あれば", "なくても", "まあ", "できれば",
    "特に気にしない", "気にしない",
];

/// Interprets a free-text answer as a tri-state boolean. Neutral phrasing
/// is checked first and wins: it maps to `None` so no filter is applied.
/// Negative phrasing beats positive when both match ("希望しない" contains
/// "希望").
pub fn interpret_tristate(value: &str) -> Option<bool> {
    let value = value.trim().to_lowercase();
    if NEUTRAL_KEYWORDS.iter().any(|kw| value.contains(kw)) {
        return None;
    }
    let is_positive = POSITIVE_KEYWORDS.iter().any(|kw| value.contains(kw));
    let is_negative = NEGATIVE_KEYWORDS.iter().any(|kw| value.contains(kw));
    if is_negative {
        Some(false)
    } else if is_positive {
        Some(true)
    } else {
        None
    }
}

/// Maps loosely-phrased preference keys from the extractor onto the
/// canonical attribute axes ("テレワーク希望" → "remote").
fn normalize_key(original: &str) -> &'static str {
    const KNOWN: &[(&str, &[&str])] = &[
        ("remote", &["remote", "リモート", "テレワーク", "wfh"]),
        ("flex_time", &["flex", "フレックス", "柔軟"]),
        ("side_job", &["side", "副業", "兼業"]),
        ("company_size", &["size", "規模", "company_type", "ベンチャー", "大企業", "startup"]),
        ("overtime", &["overtime", "残業", "労働時間"]),
        ("training", &["training", "研修", "教育"]),
        ("growth", &["growth", "成長", "キャリア", "career"]),
        ("promotion", &["promotion", "昇進", "昇格"]),
    ];
    let key_lower = original.to_lowercase();
    for (canonical, aliases) in KNOWN {
        if aliases.iter().any(|a| key_lower.contains(a)) {
            return canonical;
        }
    }
    "unrecognized"
}

impl PreferenceFilter {
    pub fn from_insights(insights: &ExtractedInsight) -> Self {
        let mut filter = Self::default();

        for (key, value) in &insights.explicit_preferences {
            match normalize_key(key) {
                "remote" => filter.remote = interpret_tristate(value),
                "flex_time" => filter.flex_time = interpret_tristate(value),
                "side_job" => filter.side_job = interpret_tristate(value),
                "training" => filter.training = interpret_tristate(value),
                "growth" => filter.growth = interpret_tristate(value),
                "company_size" => {
                    if contains_any(value, &["大きい", "大企業", "大手", "安定", "大規模"]) {
                        filter.company_size = Some(SizeClass::Large);
                    } else if contains_any(value, &["小", "スタートアップ", "ベンチャー", "中小", "中堅"]) {
                        filter.company_size = Some(SizeClass::SmallOrMedium);
                    }
                }
                "overtime" => {
                    if contains_any(value, &["少な", "短", "無し", "なし"]) {
                        filter.overtime_low = true;
                    }
                }
                "promotion" => {
                    if contains_any(value, &["早い", "速い", "多い", "優先"]) {
                        filter.promotion_fast = true;
                    }
                }
                _ => {}
            }
        }

        filter
    }

    /// True when the candidate survives every active attribute filter.
    fn matches(&self, job: &JobCandidate) -> bool {
        let attrs = &job.attributes;

        if let Some(want_remote) = self.remote {
            let has_remote = attrs.remote != RemotePolicy::None;
            if want_remote != has_remote {
                return false;
            }
        }
        if let Some(want) = self.flex_time {
            if attrs.flex_time != want {
                return false;
            }
        }
        if let Some(want) = self.side_job {
            if attrs.side_job != want {
                return false;
            }
        }
        if let Some(want) = self.training {
            if attrs.training != want {
                return false;
            }
        }
        if let Some(want) = self.growth {
            if attrs.growth_opportunities != want {
                return false;
            }
        }
        match self.company_size {
            Some(SizeClass::Large) if attrs.company_size != CompanySize::Large => return false,
            Some(SizeClass::SmallOrMedium)
                if !matches!(attrs.company_size, CompanySize::Small | CompanySize::Medium) =>
            {
                return false
            }
            _ => {}
        }
        if self.overtime_low && attrs.overtime != OvertimeLevel::Low {
            return false;
        }
        if self.promotion_fast && attrs.promotion_speed != PromotionSpeed::Fast {
            return false;
        }

        true
    }
}

fn contains_any(value: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| value.contains(kw))
}

/// How far the hard constraints were relaxed to produce a non-empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    /// Full constraints held.
    None,
    /// Salary floor lowered by 100万円.
    SalaryRelaxed,
    /// Location constraint dropped (salary stays relaxed).
    LocationDropped,
    /// Title match only.
    TitleOnly,
}

fn matches_title(job: &JobCandidate, titles: &[String]) -> bool {
    if titles.is_empty() {
        return true;
    }
    let job_title = job.title.to_lowercase();
    titles.iter().any(|t| job_title.contains(&t.to_lowercase()))
}

fn matches_location(job: &JobCandidate, locations: &[String]) -> bool {
    if locations.is_empty() {
        return true;
    }
    let job_location = job.location.to_lowercase();
    locations
        .iter()
        .any(|l| job_location.contains(&l.to_lowercase()))
}

fn matches_hard(job: &JobCandidate, criteria: &SearchCriteria, relaxation: Relaxation) -> bool {
    if !matches_title(job, &criteria.titles) {
        return false;
    }
    match relaxation {
        Relaxation::None => {
            matches_location(job, &criteria.locations) && job.salary_min >= criteria.salary_min
        }
        Relaxation::SalaryRelaxed => {
            matches_location(job, &criteria.locations)
                && job.salary_min >= criteria.salary_min.saturating_sub(100)
        }
        Relaxation::LocationDropped => job.salary_min >= criteria.salary_min.saturating_sub(100),
        Relaxation::TitleOnly => true,
    }
}

/// Additive score for a candidate that survived the strict filter pass.
fn score_strict(job: &JobCandidate, criteria: &SearchCriteria, filter: &PreferenceFilter) -> f64 {
    let mut score = 1.0;

    let job_title = job.title.to_lowercase();
    for title in &criteria.titles {
        if job_title.contains(&title.to_lowercase()) {
            score += 3.0;
        }
    }
    let job_location = job.location.to_lowercase();
    for location in &criteria.locations {
        if job_location.contains(&location.to_lowercase()) {
            score += 2.0;
        }
    }
    if job.salary_min >= criteria.salary_min {
        score += 2.0;
    }

    let attrs = &job.attributes;

    // Multi-axis bonuses: exact preference satisfaction earns the larger
    // bonus, mere presence the smaller one.
    match (filter.remote, attrs.remote) {
        (Some(true), RemotePolicy::Full) => score += 5.0,
        (Some(true), RemotePolicy::Hybrid) => score += 3.0,
        (Some(false), RemotePolicy::None) => score += 2.0,
        _ => {}
    }
    if filter.flex_time == Some(true) && attrs.flex_time {
        score += 4.0;
    }
    if filter.side_job == Some(true) && attrs.side_job {
        score += 4.0;
    }
    if filter.overtime_low && attrs.overtime == OvertimeLevel::Low {
        score += 5.0;
    }
    match (filter.company_size, attrs.company_size) {
        (Some(SizeClass::Large), CompanySize::Large) => score += 6.0,
        (Some(SizeClass::SmallOrMedium), CompanySize::Small | CompanySize::Medium) => score += 5.0,
        _ => {}
    }
    if filter.growth == Some(true) && attrs.growth_opportunities {
        score += 5.0;
    }
    if filter.training == Some(true) && attrs.training {
        score += 5.0;
    }
    if filter.promotion_fast && attrs.promotion_speed == PromotionSpeed::Fast {
        score += 6.0;
    }

    score
}

/// Rank-based score for candidates found only after relaxing constraints.
fn score_relaxed(job: &JobCandidate, criteria: &SearchCriteria, rank: usize, top_k: usize) -> f64 {
    let mut score = top_k.saturating_sub(rank) as f64;
    let job_title = job.title.to_lowercase();
    for title in &criteria.titles {
        if job_title.contains(&title.to_lowercase()) {
            score += 10.0;
        }
    }
    let job_location = job.location.to_lowercase();
    for location in &criteria.locations {
        if job_location.contains(&location.to_lowercase()) {
            score += 5.0;
        }
    }
    if job.salary_min >= criteria.salary_min {
        score += 8.0;
    }
    score
}

#[derive(Debug, Clone)]
pub struct ContentSearchOutcome {
    /// (job_id, score) sorted descending, job id as tie-break.
    pub scored: Vec<(Uuid, f64)>,
    pub relaxation: Relaxation,
}

/// Scores the job pool against baseline criteria plus accumulated
/// preference filters.
///
/// `exclude` holds jobs the user already applied to or favorited (never
/// re-recommended). On zero survivors the hard constraints are
/// progressively relaxed — salary first, then location, then title-only —
/// with preference filters dropped entirely; only after all four passes
/// does this return empty.
pub fn search(
    jobs: &[JobCandidate],
    criteria: &SearchCriteria,
    filter: &PreferenceFilter,
    exclude: &BTreeSet<Uuid>,
    top_k: usize,
) -> ContentSearchOutcome {
    let eligible = |job: &&JobCandidate| !exclude.contains(&job.id);

    let mut scored: Vec<(Uuid, f64)> = jobs
        .iter()
        .filter(eligible)
        .filter(|job| matches_hard(job, criteria, Relaxation::None) && filter.matches(job))
        .map(|job| (job.id, score_strict(job, criteria, filter)))
        .collect();

    if !scored.is_empty() {
        sort_scored(&mut scored, top_k);
        return ContentSearchOutcome {
            scored,
            relaxation: Relaxation::None,
        };
    }

    for relaxation in [
        Relaxation::SalaryRelaxed,
        Relaxation::LocationDropped,
        Relaxation::TitleOnly,
    ] {
        warn!(?relaxation, "content search empty, relaxing constraints");
        let mut relaxed: Vec<(Uuid, f64)> = jobs
            .iter()
            .filter(eligible)
            .filter(|job| matches_hard(job, criteria, relaxation))
            .enumerate()
            .map(|(rank, job)| (job.id, score_relaxed(job, criteria, rank, top_k)))
            .collect();
        if !relaxed.is_empty() {
            sort_scored(&mut relaxed, top_k);
            return ContentSearchOutcome {
                scored: relaxed,
                relaxation,
            };
        }
    }

    ContentSearchOutcome {
        scored: Vec::new(),
        relaxation: Relaxation::TitleOnly,
    }
}

fn sort_scored(scored: &mut Vec<(Uuid, f64)>, top_k: usize) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
}
