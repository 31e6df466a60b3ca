//! Conversation orchestration. `TurnController` is the only place session
//! state is mutated; everything under `matching` is pure and everything
//! under `store` and `extraction` sits behind traits so the whole turn flow
//! is testable in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::{
    degrade_question, IntentExtractor, QuestionGenerator, FALLBACK_REASONING,
};
use crate::matching::candidate_set::{accept_alternative, expand_candidates, EXPANSION_FETCH_LIMIT};
use crate::matching::collaborative::{self, RECOMMENDATION_K};
use crate::matching::content_based::{self, PreferenceFilter, SearchCriteria};
use crate::matching::hybrid;
use crate::matching::insights::{CandidateAction, RawExtraction};
use crate::matching::rescoring::rescore_all;
use crate::matching::termination::{self, ConversationPhase};
use crate::models::job::{InteractionKind, JobCandidate};
use crate::models::session::{ConversationSession, EndReason, ScoreRecord};
use crate::store::PreferenceStore;

pub mod handlers;

/// Working candidate set cap at session start.
const CANDIDATE_CAP: usize = 20;
/// Job rows fetched from storage to build the initial pool.
const INITIAL_POOL_LIMIT: i64 = 200;
/// Arbitrary postings seeded when even the relaxed search finds nothing.
const FALLBACK_SEED_COUNT: usize = 3;
/// Audit rows written per turn.
const SCORE_RECORD_TOP_N: usize = 10;
/// Jobs surfaced to the user when the session ends or mid-conversation.
const VISIBLE_TOP_N: usize = 5;
/// Candidates are shown mid-conversation only past this match level...
const DISPLAY_MATCH_THRESHOLD: f64 = 70.0;
/// ...and only once this many turns have gathered real signal.
const DISPLAY_MIN_TURN: u32 = 5;

/// In-process session map. The outer mutex guards the map only; each
/// session carries its own async mutex so turns for one session serialize
/// while different sessions proceed in parallel.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<ConversationSession>>>>,
}

impl SessionRegistry {
    pub fn insert(&self, session: ConversationSession) -> Arc<tokio::sync::Mutex<ConversationSession>> {
        let id = session.id;
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        self.sessions.lock().unwrap().insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<tokio::sync::Mutex<ConversationSession>>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Drops a sealed session from the map. The durable snapshot keeps
    /// serving `GET /sessions/:id`; only the live handle goes away.
    pub fn remove(&self, id: Uuid) {
        self.sessions.lock().unwrap().remove(&id);
    }
}

/// What one processed turn hands back to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub ended: bool,
    pub message: String,
    pub visible_jobs: Vec<JobCandidate>,
    pub turn_number: u32,
    pub top_match_percentage: f64,
    pub end_reason: Option<EndReason>,
}

pub struct TurnController {
    store: Arc<dyn PreferenceStore>,
    extractor: Arc<dyn IntentExtractor>,
    generator: Arc<dyn QuestionGenerator>,
}

impl TurnController {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        extractor: Arc<dyn IntentExtractor>,
        generator: Arc<dyn QuestionGenerator>,
    ) -> Self {
        Self {
            store,
            extractor,
            generator,
        }
    }

    /// Builds the initial candidate set for a user and opens the session.
    ///
    /// Collaborative and content-based scores are merged 0.4/0.6 to order
    /// the set; the conversational scores themselves start at zero and are
    /// earned turn by turn.
    pub async fn start_session(
        &self,
        user_id: i64,
    ) -> Result<(ConversationSession, String), AppError> {
        let baseline = self.store.load_baseline(user_id).await?;
        let criteria = baseline
            .as_ref()
            .map(SearchCriteria::from_baseline)
            .unwrap_or_default();

        let pool = if criteria.titles.is_empty() {
            self.store.load_all_jobs(INITIAL_POOL_LIMIT).await?
        } else {
            self.store
                .search_jobs(&criteria.titles, INITIAL_POOL_LIMIT)
                .await?
        };

        let events = self.store.load_interactions().await?;
        // Applied or favorited postings are never recommended again.
        let exclude: BTreeSet<Uuid> = events
            .iter()
            .filter(|e| {
                e.user_id == user_id
                    && matches!(e.kind, InteractionKind::Apply | InteractionKind::Favorite)
            })
            .map(|e| e.job_id)
            .collect();

        let collaborative = collaborative::recommend(user_id, &events, RECOMMENDATION_K);

        // Collaborative picks can fall outside the title-based pool; hydrate
        // them so the merge below can actually surface them.
        let mut pool = pool;
        let known: BTreeSet<Uuid> = pool.iter().map(|j| j.id).collect();
        let missing: Vec<Uuid> = collaborative
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !known.contains(id) && !exclude.contains(id))
            .collect();
        if !missing.is_empty() {
            pool.extend(self.store.load_jobs_by_ids(&missing).await?);
        }

        let content = content_based::search(
            &pool,
            &criteria,
            &PreferenceFilter::default(),
            &exclude,
            CANDIDATE_CAP,
        );

        let created_at: BTreeMap<Uuid, DateTime<Utc>> =
            pool.iter().map(|j| (j.id, j.created_at)).collect();
        let merged = hybrid::merge(&collaborative, &content.scored, &created_at);

        let by_id: BTreeMap<Uuid, &JobCandidate> = pool.iter().map(|j| (j.id, j)).collect();
        let mut candidates: Vec<JobCandidate> = merged
            .iter()
            .filter_map(|(id, _)| by_id.get(id))
            .map(|job| {
                let mut job = (*job).clone();
                job.score = 0.0;
                job.match_percentage = 0.0;
                job.score_details.clear();
                job
            })
            .take(CANDIDATE_CAP)
            .collect();

        if candidates.is_empty() {
            // Even title-only matching found nothing: seed with a few
            // arbitrary active postings so the conversation can start.
            warn!(user_id, "no candidates after relaxed search, seeding arbitrary jobs");
            candidates = self
                .store
                .load_all_jobs(INITIAL_POOL_LIMIT)
                .await?
                .into_iter()
                .filter(|j| !exclude.contains(&j.id))
                .take(FALLBACK_SEED_COUNT)
                .collect();
        }

        let session = ConversationSession::new(user_id, candidates);
        self.store.upsert_session_state(&session).await?;

        info!(
            session_id = %session.id,
            user_id,
            candidates = session.candidates.len(),
            relaxation = ?content.relaxation,
            "conversation session started"
        );

        let greeting = format!(
            "こんにちは！あなたに合う求人を一緒に探していきます。\n\n{}",
            crate::extraction::fallback_question(1)
        );

        Ok((session, greeting))
    }

    /// Reads a session back from its durable snapshot, for lookups that
    /// miss the in-process registry.
    pub async fn load_session(&self, id: Uuid) -> Result<Option<ConversationSession>, AppError> {
        self.store.load_session_state(id).await
    }

    /// Processes one user message end to end: extract, mutate the candidate
    /// set if asked, merge insights, rescore, record, and decide whether the
    /// conversation ends.
    ///
    /// Extraction failures degrade to an empty delta; the turn still counts
    /// and still produces a response.
    pub async fn process_turn(
        &self,
        session: &mut ConversationSession,
        user_id: i64,
        message: &str,
    ) -> Result<TurnOutcome, AppError> {
        // A session id alone must not grant access to someone else's
        // conversation. Same response as an unknown id.
        if session.user_id != user_id {
            return Err(AppError::InvalidSession(format!(
                "Session {} not found",
                session.id
            )));
        }
        if session.is_ended() {
            return Err(AppError::Validation(
                "This conversation has ended; start a new session".to_string(),
            ));
        }

        let raw = match self.extractor.extract(message, &session.insights).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id = %session.id, "extraction degraded to empty delta: {e}");
                RawExtraction::default()
            }
        };
        let (delta, action) = raw.decode();
        session.insights.merge(delta);

        match action {
            CandidateAction::None => {}
            CandidateAction::CategoryExpansion(titles) => {
                // Fetched postings still pass through the accumulated
                // preference filters before joining the working set.
                let filter = PreferenceFilter::from_insights(&session.insights);
                for title in &titles {
                    let fetched = self
                        .store
                        .search_jobs(std::slice::from_ref(title), EXPANSION_FETCH_LIMIT as i64)
                        .await?;
                    let outcome = content_based::search(
                        &fetched,
                        &SearchCriteria::title_only(title),
                        &filter,
                        &BTreeSet::new(),
                        EXPANSION_FETCH_LIMIT,
                    );
                    let by_id: BTreeMap<Uuid, JobCandidate> =
                        fetched.into_iter().map(|j| (j.id, j)).collect();
                    let selected: Vec<JobCandidate> = outcome
                        .scored
                        .iter()
                        .filter_map(|(id, _)| by_id.get(id).cloned())
                        .collect();
                    let added = expand_candidates(&mut session.candidates, selected);
                    debug!(session_id = %session.id, title, added, "category expansion applied");
                }
            }
            CandidateAction::AlternativeAccepted { kind, details } => {
                accept_alternative(&mut session.insights, &kind, &details);
            }
        }

        session.turn_number += 1;
        rescore_all(&mut session.candidates, &session.insights);
        session.record_turn_score();

        for job in session.candidates.iter().take(SCORE_RECORD_TOP_N) {
            self.store
                .append_score_record(&ScoreRecord {
                    session_id: session.id,
                    turn_number: session.turn_number,
                    job_id: job.id,
                    score: job.score,
                    match_percentage: job.match_percentage,
                    score_details: job.score_details.clone(),
                })
                .await?;
        }

        let top_match = session
            .top_candidate()
            .map(|c| c.match_percentage)
            .unwrap_or(0.0);

        let decision = termination::decide(
            session.turn_number,
            top_match,
            &session.score_history,
            message,
        );

        let outcome = match decision {
            Some(reason) => {
                let top: Vec<JobCandidate> = session
                    .candidates
                    .iter()
                    .take(VISIBLE_TOP_N)
                    .cloned()
                    .collect();
                let message = self.build_recommendation(session, &top, reason).await;
                session.seal(reason, top.iter().map(|j| j.id).collect());

                info!(
                    session_id = %session.id,
                    turn = session.turn_number,
                    reason = reason.as_str(),
                    "conversation ended"
                );

                TurnOutcome {
                    ended: true,
                    message,
                    visible_jobs: top,
                    turn_number: session.turn_number,
                    top_match_percentage: top_match,
                    end_reason: Some(reason),
                }
            }
            None => {
                let question = match self
                    .generator
                    .next_question(
                        &session.insights,
                        session.turn_number,
                        session.candidates.len(),
                    )
                    .await
                {
                    Ok(q) => q,
                    Err(e) => degrade_question(session.turn_number + 1, &e),
                };

                let stage = ConversationPhase::for_turn(session.turn_number).stage_label();
                let message = format!(
                    "{question}\n\n[{stage}] 候補: {}件 | マッチ度: {top_match:.0}%",
                    session.candidates.len()
                );

                let visible_jobs = if top_match >= DISPLAY_MATCH_THRESHOLD
                    && session.turn_number >= DISPLAY_MIN_TURN
                {
                    session
                        .candidates
                        .iter()
                        .take(VISIBLE_TOP_N)
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };

                TurnOutcome {
                    ended: false,
                    message,
                    visible_jobs,
                    turn_number: session.turn_number,
                    top_match_percentage: top_match,
                    end_reason: None,
                }
            }
        };

        self.store.upsert_session_state(session).await?;

        Ok(outcome)
    }

    /// Final recommendation text: each presented posting with its match
    /// level and a one-line reasoning, falling back to canned reasoning
    /// per posting on generator failure.
    async fn build_recommendation(
        &self,
        session: &ConversationSession,
        top: &[JobCandidate],
        reason: EndReason,
    ) -> String {
        let intro = match reason {
            EndReason::HighMatch => "十分にマッチする求人が見つかりました！",
            EndReason::ScoreConverged => "これまでのお話から、おすすめが固まりました。",
            EndReason::UserRequested => "かしこまりました。現時点でのおすすめをご紹介します。",
            EndReason::MaxTurns => "たくさんお話を聞かせていただきました。最終的なおすすめはこちらです。",
        };

        let mut lines = vec![intro.to_string()];
        for (i, job) in top.iter().enumerate() {
            let reasoning = match self.generator.match_reasoning(job, &session.insights).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(session_id = %session.id, job_id = %job.id, "reasoning degraded: {e}");
                    FALLBACK_REASONING.to_string()
                }
            };
            lines.push(format!(
                "{}. {}（{}） マッチ度{:.0}%\n   {}",
                i + 1,
                job.title,
                job.company_name,
                job.match_percentage,
                reasoning
            ));
        }
        lines.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{InteractionEvent, JobAttributes, RemotePolicy};
    use crate::models::user::UserBaseline;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    struct StubExtractor {
        /// Queue of extractions, popped front per call. Empty queue means
        /// "fail", exercising the degradation path.
        queue: StdMutex<Vec<RawExtraction>>,
    }

    impl StubExtractor {
        fn with(extractions: Vec<RawExtraction>) -> Self {
            Self {
                queue: StdMutex::new(extractions),
            }
        }

        fn failing() -> Self {
            Self::with(Vec::new())
        }
    }

    #[async_trait]
    impl IntentExtractor for StubExtractor {
        async fn extract(
            &self,
            _message: &str,
            _current: &crate::matching::insights::ExtractedInsight,
        ) -> Result<RawExtraction, AppError> {
            let mut queue = self.queue.lock().unwrap();
            if queue.is_empty() {
                Err(AppError::Llm("stub extractor exhausted".to_string()))
            } else {
                Ok(queue.remove(0))
            }
        }
    }

    /// Always fails, so every conversational output takes the fallback path.
    struct FailingGenerator;

    #[async_trait]
    impl QuestionGenerator for FailingGenerator {
        async fn next_question(
            &self,
            _insights: &crate::matching::insights::ExtractedInsight,
            _turn: u32,
            _candidate_count: usize,
        ) -> Result<String, AppError> {
            Err(AppError::Llm("stub generator".to_string()))
        }

        async fn match_reasoning(
            &self,
            _job: &JobCandidate,
            _insights: &crate::matching::insights::ExtractedInsight,
        ) -> Result<String, AppError> {
            Err(AppError::Llm("stub generator".to_string()))
        }
    }

    fn make_job(n: u128, title: &str, remote: RemotePolicy) -> JobCandidate {
        JobCandidate {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            company_name: "テスト株式会社".to_string(),
            location: "東京都".to_string(),
            salary_min: 450,
            salary_max: 650,
            attributes: JobAttributes {
                remote,
                ..Default::default()
            },
            created_at: Utc::now(),
            score: 0.0,
            match_percentage: 0.0,
            score_details: vec![],
        }
    }

    fn store_with_jobs(jobs: Vec<JobCandidate>) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore {
            baselines: vec![UserBaseline {
                user_id: 1,
                job_title: "デザイナー".to_string(),
                location: "東京都".to_string(),
                min_salary: 400,
            }],
            jobs,
            ..Default::default()
        })
    }

    fn controller(store: Arc<InMemoryStore>, extractor: StubExtractor) -> TurnController {
        TurnController::new(store, Arc::new(extractor), Arc::new(FailingGenerator))
    }

    fn remote_preference() -> RawExtraction {
        serde_json::from_str(
            r#"{
                "explicit_preferences": {"remote_work": "強く希望"},
                "keywords": ["リモート"],
                "confidence": 0.9
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_session_builds_candidates_at_score_zero() {
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(2, "UIデザイナー", RemotePolicy::None),
        ]);
        let controller = controller(store.clone(), StubExtractor::failing());

        let (session, greeting) = controller.start_session(1).await.unwrap();

        assert_eq!(session.turn_number, 0);
        assert_eq!(session.candidates.len(), 2);
        assert!(session.candidates.iter().all(|c| c.score == 0.0));
        assert!(greeting.contains("理想の職場環境"));
        // Write-through: the opened session is already persisted.
        assert_eq!(store.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_session_excludes_applied_jobs() {
        let store = Arc::new(InMemoryStore {
            baselines: vec![UserBaseline {
                user_id: 1,
                job_title: "デザイナー".to_string(),
                location: "東京都".to_string(),
                min_salary: 400,
            }],
            jobs: vec![
                make_job(1, "Webデザイナー", RemotePolicy::Full),
                make_job(2, "UIデザイナー", RemotePolicy::None),
            ],
            interactions: vec![InteractionEvent {
                user_id: 1,
                job_id: Uuid::from_u128(1),
                kind: InteractionKind::Apply,
            }],
            ..Default::default()
        });
        let controller = controller(store, StubExtractor::failing());

        let (session, _) = controller.start_session(1).await.unwrap();
        assert!(session.candidates.iter().all(|c| c.id != Uuid::from_u128(1)));
    }

    #[tokio::test]
    async fn test_turn_advances_even_when_extraction_fails() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        let controller = controller(store, StubExtractor::failing());

        let (mut session, _) = controller.start_session(1).await.unwrap();
        let outcome = controller
            .process_turn(&mut session, 1, "リモートで働きたいです")
            .await
            .unwrap();

        assert_eq!(session.turn_number, 1);
        assert!(!outcome.ended);
        // Degraded extraction leaves insights empty but the fallback
        // question still arrives.
        assert!(session.insights.explicit_preferences.is_empty());
        assert!(outcome.message.contains("どのようなチームと働きたいですか？"));
        assert!(outcome.message.contains("基本情報収集中"));
    }

    #[tokio::test]
    async fn test_insights_accumulate_and_scores_move() {
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(2, "UIデザイナー", RemotePolicy::None),
        ]);
        let controller = controller(store, StubExtractor::with(vec![remote_preference()]));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        let outcome = controller
            .process_turn(&mut session, 1, "フルリモート必須です")
            .await
            .unwrap();

        assert_eq!(session.insights.preference("remote_work"), Some("強く希望"));
        // Full-remote posting outranks the on-site one after rescoring.
        assert_eq!(session.top_candidate().unwrap().id, Uuid::from_u128(1));
        assert!(session.top_candidate().unwrap().score > 50.0);
        assert_eq!(session.score_history.len(), 1);
        assert!(outcome.top_match_percentage > 0.0);
    }

    #[tokio::test]
    async fn test_score_records_appended_per_turn() {
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(2, "UIデザイナー", RemotePolicy::None),
        ]);
        let controller = controller(store.clone(), StubExtractor::failing());

        let (mut session, _) = controller.start_session(1).await.unwrap();
        controller.process_turn(&mut session, 1, "こんにちは").await.unwrap();

        let records = store.score_records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.turn_number == 1));
        assert!(records.iter().all(|r| r.session_id == session.id));
    }

    #[tokio::test]
    async fn test_category_expansion_grows_candidate_set() {
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(3, "バックエンドエンジニア", RemotePolicy::Hybrid),
        ]);
        let expansion: RawExtraction = serde_json::from_str(
            r#"{
                "keywords": ["エンジニア"],
                "confidence": 0.8,
                "job_change_request": {
                    "requested": true,
                    "new_job_titles": ["エンジニア"]
                }
            }"#,
        )
        .unwrap();
        let controller = controller(store, StubExtractor::with(vec![expansion]));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        // Baseline search matched only the designer posting.
        assert_eq!(session.candidates.len(), 1);

        controller
            .process_turn(&mut session, 1, "エンジニアの求人も見たいです")
            .await
            .unwrap();

        assert_eq!(session.candidates.len(), 2);
        assert!(session
            .candidates
            .iter()
            .any(|c| c.id == Uuid::from_u128(3)));
    }

    #[tokio::test]
    async fn test_alternative_acceptance_updates_insights() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        let acceptance: RawExtraction = serde_json::from_str(
            r#"{
                "alternative_condition_acceptance": {
                    "accepted": true,
                    "condition_type": "work_hours",
                    "details": "フレックスで出社でも可"
                }
            }"#,
        )
        .unwrap();
        let controller = controller(store, StubExtractor::with(vec![acceptance]));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        controller
            .process_turn(&mut session, 1, "フレックスなら出社でも大丈夫です")
            .await
            .unwrap();

        assert!(session.insights.preference("flexible_hours").is_some());
        assert!(session.insights.keywords.contains("フレックス"));
    }

    #[tokio::test]
    async fn test_user_requested_exit_seals_session() {
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(2, "UIデザイナー", RemotePolicy::None),
        ]);
        let controller = controller(store, StubExtractor::failing());

        let (mut session, _) = controller.start_session(1).await.unwrap();
        let outcome = controller
            .process_turn(&mut session, 1, "もう十分です。結果を見せてください")
            .await
            .unwrap();

        assert!(outcome.ended);
        assert_eq!(outcome.end_reason, Some(EndReason::UserRequested));
        assert!(session.is_ended());
        assert_eq!(session.presented_job_ids.len(), 2);
        assert_eq!(outcome.visible_jobs.len(), 2);
        // Generator failed, so each posting carries the canned reasoning.
        assert!(outcome.message.contains(FALLBACK_REASONING));
    }

    #[tokio::test]
    async fn test_sealed_session_rejects_further_turns() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        let controller = controller(store, StubExtractor::failing());

        let (mut session, _) = controller.start_session(1).await.unwrap();
        controller
            .process_turn(&mut session, 1, "結果を見せて")
            .await
            .unwrap();

        let err = controller
            .process_turn(&mut session, 1, "続けたい")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        // The sealed session did not advance.
        assert_eq!(session.turn_number, 1);
    }

    #[tokio::test]
    async fn test_forced_termination_at_max_turns() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        // The remote preference flips every turn, so the top score swings
        // between 70 and 50: no convergence, no high match, only the cap.
        let remote_off: RawExtraction = serde_json::from_str(
            r#"{"explicit_preferences": {"remote_work": "不要"}, "confidence": 0.5}"#,
        )
        .unwrap();
        let extractions = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    remote_preference()
                } else {
                    remote_off.clone()
                }
            })
            .collect();
        let controller = controller(store, StubExtractor::with(extractions));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        let mut last = None;
        for _ in 0..10 {
            last = Some(
                controller
                    .process_turn(&mut session, 1, "うーん、特にないです")
                    .await
                    .unwrap(),
            );
        }

        let last = last.unwrap();
        assert!(last.ended);
        assert_eq!(last.end_reason, Some(EndReason::MaxTurns));
        assert_eq!(session.turn_number, 10);
    }

    #[tokio::test]
    async fn test_start_session_seeds_fallback_jobs_when_search_empty() {
        // No posting matches the baseline title; arbitrary seeding kicks in.
        let store = Arc::new(InMemoryStore {
            baselines: vec![UserBaseline {
                user_id: 1,
                job_title: "存在しない職種".to_string(),
                location: "東京都".to_string(),
                min_salary: 400,
            }],
            jobs: vec![
                make_job(1, "営業", RemotePolicy::None),
                make_job(2, "経理", RemotePolicy::None),
                make_job(3, "総務", RemotePolicy::None),
                make_job(4, "広報", RemotePolicy::None),
            ],
            ..Default::default()
        });
        let controller = controller(store, StubExtractor::failing());

        let (session, _) = controller.start_session(1).await.unwrap();
        assert_eq!(session.candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_expansion_request_without_titles_is_ignored() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        let no_titles: RawExtraction = serde_json::from_str(
            r#"{"job_change_request": {"requested": true, "new_job_titles": []}}"#,
        )
        .unwrap();
        let controller = controller(store, StubExtractor::with(vec![no_titles]));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        controller
            .process_turn(&mut session, 1, "他の職種もいいかも")
            .await
            .unwrap();
        assert_eq!(session.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_collaborative_only_jobs_join_initial_set() {
        // User 2 behaves like user 1 on the designer posting and also
        // applied to a sales posting outside the baseline title. The sales
        // posting must still reach the initial candidate set.
        let store = Arc::new(InMemoryStore {
            baselines: vec![UserBaseline {
                user_id: 1,
                job_title: "デザイナー".to_string(),
                location: "東京都".to_string(),
                min_salary: 400,
            }],
            jobs: vec![
                make_job(1, "Webデザイナー", RemotePolicy::Full),
                make_job(9, "法人営業", RemotePolicy::None),
            ],
            interactions: vec![
                InteractionEvent {
                    user_id: 1,
                    job_id: Uuid::from_u128(1),
                    kind: InteractionKind::Click,
                },
                InteractionEvent {
                    user_id: 2,
                    job_id: Uuid::from_u128(1),
                    kind: InteractionKind::Click,
                },
                InteractionEvent {
                    user_id: 2,
                    job_id: Uuid::from_u128(9),
                    kind: InteractionKind::Apply,
                },
            ],
            ..Default::default()
        });
        let recs = collaborative::recommend(1, &store.interactions, RECOMMENDATION_K);
        assert!(recs.iter().any(|(id, _)| *id == Uuid::from_u128(9)));

        let controller = controller(store, StubExtractor::failing());
        let (session, _) = controller.start_session(1).await.unwrap();

        assert!(session
            .candidates
            .iter()
            .any(|c| c.id == Uuid::from_u128(9)));
        assert!(session
            .candidates
            .iter()
            .any(|c| c.id == Uuid::from_u128(1)));
    }

    #[tokio::test]
    async fn test_turn_for_wrong_user_is_rejected() {
        let store = store_with_jobs(vec![make_job(1, "Webデザイナー", RemotePolicy::Full)]);
        let controller = controller(store, StubExtractor::failing());

        let (mut session, _) = controller.start_session(1).await.unwrap();
        let err = controller
            .process_turn(&mut session, 2, "リモート希望です")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidSession(_)));
        assert_eq!(session.turn_number, 0);
        assert!(session.score_history.is_empty());
    }

    #[tokio::test]
    async fn test_expansion_respects_accumulated_preferences() {
        // Remote is strongly desired before the category expansion, so the
        // on-site engineer posting must not join the working set.
        let store = store_with_jobs(vec![
            make_job(1, "Webデザイナー", RemotePolicy::Full),
            make_job(3, "バックエンドエンジニア", RemotePolicy::Full),
            make_job(4, "インフラエンジニア", RemotePolicy::None),
        ]);
        let expansion: RawExtraction = serde_json::from_str(
            r#"{
                "explicit_preferences": {"remote_work": "強く希望"},
                "confidence": 0.8,
                "job_change_request": {
                    "requested": true,
                    "new_job_titles": ["エンジニア"]
                }
            }"#,
        )
        .unwrap();
        let controller = controller(store, StubExtractor::with(vec![expansion]));

        let (mut session, _) = controller.start_session(1).await.unwrap();
        controller
            .process_turn(&mut session, 1, "リモートのエンジニア求人も見たいです")
            .await
            .unwrap();

        assert!(session
            .candidates
            .iter()
            .any(|c| c.id == Uuid::from_u128(3)));
        assert!(session
            .candidates
            .iter()
            .all(|c| c.id != Uuid::from_u128(4)));
    }

    #[test]
    fn test_registry_remove_drops_live_handle() {
        let registry = SessionRegistry::default();
        let session = ConversationSession::new(1, vec![]);
        let id = session.id;
        registry.insert(session);
        assert!(registry.get(id).is_some());

        registry.remove(id);
        assert!(registry.get(id).is_none());
        // Removing again is a no-op.
        registry.remove(id);
    }
}
