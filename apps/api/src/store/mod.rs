/// Persistence layer. All SQL lives here; the matching and conversation
/// modules operate on plain domain types and never see `sqlx` rows.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{
    CompanySize, InteractionEvent, InteractionKind, JobAttributes, JobCandidate, OvertimeLevel,
    PromotionSpeed, RemotePolicy,
};
use crate::models::session::{ConversationSession, ScoreRecord};
use crate::models::user::UserBaseline;

/// Read side: registered preferences, interaction history, job search.
/// Write side: score audit rows and session snapshots.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Registered search conditions for one user, if any.
    async fn load_baseline(&self, user_id: i64) -> Result<Option<UserBaseline>, AppError>;

    /// Full snapshot of the interaction log, all users. The collaborative
    /// scorer builds its rating matrix from this.
    async fn load_interactions(&self) -> Result<Vec<InteractionEvent>, AppError>;

    /// Active postings whose title matches any of the given fragments.
    async fn search_jobs(&self, titles: &[String], limit: i64)
        -> Result<Vec<JobCandidate>, AppError>;

    /// Most recent active postings regardless of title.
    async fn load_all_jobs(&self, limit: i64) -> Result<Vec<JobCandidate>, AppError>;

    /// Active postings by id, for hydrating collaborative recommendations
    /// that fall outside the title-based pool. Unknown ids are skipped.
    async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobCandidate>, AppError>;

    /// Appends one immutable score audit row.
    async fn append_score_record(&self, record: &ScoreRecord) -> Result<(), AppError>;

    /// Write-through snapshot of the session aggregate, keyed by session id.
    async fn upsert_session_state(&self, session: &ConversationSession) -> Result<(), AppError>;

    /// Reads back a persisted session snapshot. Used when the in-process
    /// registry misses, e.g. after a restart.
    async fn load_session_state(&self, id: Uuid)
        -> Result<Option<ConversationSession>, AppError>;
}

// ─── Postgres implementation ───────────────────────────────────────────────

pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BaselineRow {
    user_id: i64,
    job_title: String,
    location: String,
    min_salary: i64,
}

#[derive(sqlx::FromRow)]
struct InteractionRow {
    user_id: i64,
    job_id: Uuid,
    interaction_type: String,
}

/// Flat row shape for the jobs table. Attribute columns are TEXT/BOOLEAN;
/// enum parsing happens in `into_candidate` so unknown values degrade to
/// defaults instead of failing the whole query.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    title: String,
    company_name: String,
    location: String,
    salary_min: i64,
    salary_max: i64,
    remote: String,
    flex_time: bool,
    side_job: bool,
    overtime: String,
    company_size: String,
    training: bool,
    growth_opportunities: bool,
    promotion_speed: String,
    skills_text: String,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_candidate(self) -> JobCandidate {
        JobCandidate {
            id: self.id,
            title: self.title,
            company_name: self.company_name,
            location: self.location,
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            attributes: JobAttributes {
                remote: parse_remote(&self.remote),
                flex_time: self.flex_time,
                side_job: self.side_job,
                overtime: parse_overtime(&self.overtime),
                company_size: parse_company_size(&self.company_size),
                training: self.training,
                growth_opportunities: self.growth_opportunities,
                promotion_speed: parse_promotion_speed(&self.promotion_speed),
                skills_text: self.skills_text,
            },
            created_at: self.created_at,
            score: 0.0,
            match_percentage: 0.0,
            score_details: Vec::new(),
        }
    }
}

fn parse_remote(s: &str) -> RemotePolicy {
    match s {
        "full" => RemotePolicy::Full,
        "hybrid" => RemotePolicy::Hybrid,
        _ => RemotePolicy::None,
    }
}

fn parse_overtime(s: &str) -> OvertimeLevel {
    match s {
        "low" => OvertimeLevel::Low,
        "high" => OvertimeLevel::High,
        _ => OvertimeLevel::Medium,
    }
}

fn parse_company_size(s: &str) -> CompanySize {
    match s {
        "small" => CompanySize::Small,
        "medium" => CompanySize::Medium,
        "large" => CompanySize::Large,
        _ => CompanySize::Unknown,
    }
}

fn parse_promotion_speed(s: &str) -> PromotionSpeed {
    match s {
        "fast" => PromotionSpeed::Fast,
        "normal" => PromotionSpeed::Normal,
        "slow" => PromotionSpeed::Slow,
        _ => PromotionSpeed::Unknown,
    }
}

fn parse_interaction_kind(s: &str) -> Option<InteractionKind> {
    match s {
        "click" => Some(InteractionKind::Click),
        "view" => Some(InteractionKind::View),
        "favorite" => Some(InteractionKind::Favorite),
        "apply" => Some(InteractionKind::Apply),
        _ => None,
    }
}

const JOB_COLUMNS: &str = "id, title, company_name, location, salary_min, salary_max, \
     remote, flex_time, side_job, overtime, company_size, training, \
     growth_opportunities, promotion_speed, skills_text, created_at";

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn load_baseline(&self, user_id: i64) -> Result<Option<UserBaseline>, AppError> {
        let row: Option<BaselineRow> = sqlx::query_as(
            "SELECT user_id, job_title, location, min_salary FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserBaseline {
            user_id: r.user_id,
            job_title: r.job_title,
            location: r.location,
            min_salary: r.min_salary,
        }))
    }

    async fn load_interactions(&self) -> Result<Vec<InteractionEvent>, AppError> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            "SELECT user_id, job_id, interaction_type FROM user_interactions",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_interaction_kind(&row.interaction_type) {
                Some(kind) => events.push(InteractionEvent {
                    user_id: row.user_id,
                    job_id: row.job_id,
                    kind,
                }),
                None => {
                    warn!("Skipping interaction with unknown type '{}'", row.interaction_type);
                }
            }
        }
        Ok(events)
    }

    async fn search_jobs(
        &self,
        titles: &[String],
        limit: i64,
    ) -> Result<Vec<JobCandidate>, AppError> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let patterns: Vec<String> = titles.iter().map(|t| format!("%{t}%")).collect();

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE is_active AND title ILIKE ANY($1) \
             ORDER BY created_at DESC, id \
             LIMIT $2"
        ))
        .bind(&patterns)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRow::into_candidate).collect())
    }

    async fn load_all_jobs(&self, limit: i64) -> Result<Vec<JobCandidate>, AppError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE is_active \
             ORDER BY created_at DESC, id \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRow::into_candidate).collect())
    }

    async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobCandidate>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE is_active AND id = ANY($1) \
             ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(JobRow::into_candidate).collect())
    }

    async fn append_score_record(&self, record: &ScoreRecord) -> Result<(), AppError> {
        let details = serde_json::to_value(&record.score_details)
            .map_err(|e| AppError::Internal(e.into()))?;

        // Append-only: score rows are never updated once written
        sqlx::query(
            "INSERT INTO score_history \
                 (session_id, turn_number, job_id, score, match_percentage, score_details) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.session_id)
        .bind(record.turn_number as i32)
        .bind(record.job_id)
        .bind(record.score)
        .bind(record.match_percentage)
        .bind(details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_session_state(&self, session: &ConversationSession) -> Result<(), AppError> {
        let state = serde_json::to_value(session).map_err(|e| AppError::Internal(e.into()))?;

        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, state, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (id) DO UPDATE \
                 SET state = EXCLUDED.state, updated_at = now()",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_session_state(
        &self,
        id: Uuid,
    ) -> Result<Option<ConversationSession>, AppError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT state FROM user_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((state,)) => {
                let session = serde_json::from_value(state)
                    .map_err(|e| AppError::Internal(e.into()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }
}

// ─── In-memory implementation for tests ────────────────────────────────────

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    /// Backing data behind a plain mutex; good enough for single-threaded
    /// test flows.
    #[derive(Default)]
    pub struct InMemoryStore {
        pub baselines: Vec<UserBaseline>,
        pub interactions: Vec<InteractionEvent>,
        pub jobs: Vec<JobCandidate>,
        pub score_records: Mutex<Vec<ScoreRecord>>,
        pub sessions: Mutex<Vec<ConversationSession>>,
    }

    #[async_trait]
    impl PreferenceStore for InMemoryStore {
        async fn load_baseline(&self, user_id: i64) -> Result<Option<UserBaseline>, AppError> {
            Ok(self
                .baselines
                .iter()
                .find(|b| b.user_id == user_id)
                .cloned())
        }

        async fn load_interactions(&self) -> Result<Vec<InteractionEvent>, AppError> {
            Ok(self.interactions.clone())
        }

        async fn search_jobs(
            &self,
            titles: &[String],
            limit: i64,
        ) -> Result<Vec<JobCandidate>, AppError> {
            let lowered: Vec<String> = titles.iter().map(|t| t.to_lowercase()).collect();
            Ok(self
                .jobs
                .iter()
                .filter(|j| {
                    let title = j.title.to_lowercase();
                    lowered.iter().any(|t| title.contains(t))
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn load_all_jobs(&self, limit: i64) -> Result<Vec<JobCandidate>, AppError> {
            Ok(self.jobs.iter().take(limit as usize).cloned().collect())
        }

        async fn load_jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobCandidate>, AppError> {
            Ok(self
                .jobs
                .iter()
                .filter(|j| ids.contains(&j.id))
                .cloned()
                .collect())
        }

        async fn append_score_record(&self, record: &ScoreRecord) -> Result<(), AppError> {
            self.score_records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn upsert_session_state(
            &self,
            session: &ConversationSession,
        ) -> Result<(), AppError> {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(existing) = sessions.iter_mut().find(|s| s.id == session.id) {
                *existing = session.clone();
            } else {
                sessions.push(session.clone());
            }
            Ok(())
        }

        async fn load_session_state(
            &self,
            id: Uuid,
        ) -> Result<Option<ConversationSession>, AppError> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.id == id)
                .cloned())
        }
    }
}
