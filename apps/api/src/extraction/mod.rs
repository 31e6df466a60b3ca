//! LLM-backed intent extraction and conversational output, behind traits so
//! the turn controller can be tested without network access.
//!
//! Every call here is bounded by a timeout and has a static fallback; a slow
//! or failing model degrades a turn, it never fails one.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::AppError;
use crate::llm_client::{prompts::JSON_ONLY_SYSTEM, LlmClient};
use crate::matching::insights::{ExtractedInsight, RawExtraction};
use crate::models::job::JobCandidate;

pub mod prompts;

const ADVISOR_SYSTEM: &str = "あなたは日本の転職支援サービスの経験豊富なキャリアアドバイザーです。\
    丁寧で自然な日本語で応答してください。";

/// Turns one free-text user message into structured insight deltas.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(
        &self,
        message: &str,
        current: &ExtractedInsight,
    ) -> Result<RawExtraction, AppError>;
}

/// Produces the conversational output side: the next question to ask and
/// per-posting recommendation reasoning.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn next_question(
        &self,
        insights: &ExtractedInsight,
        turn: u32,
        candidate_count: usize,
    ) -> Result<String, AppError>;

    async fn match_reasoning(
        &self,
        job: &JobCandidate,
        insights: &ExtractedInsight,
    ) -> Result<String, AppError>;
}

// ─── LLM-backed implementations ────────────────────────────────────────────

pub struct LlmIntentExtractor {
    llm: LlmClient,
    timeout: Duration,
}

impl LlmIntentExtractor {
    pub fn new(llm: LlmClient, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl IntentExtractor for LlmIntentExtractor {
    async fn extract(
        &self,
        message: &str,
        current: &ExtractedInsight,
    ) -> Result<RawExtraction, AppError> {
        let prompt = prompts::build_extraction_prompt(message, current);

        let result = tokio::time::timeout(
            self.timeout,
            self.llm.call_json::<RawExtraction>(&prompt, JSON_ONLY_SYSTEM),
        )
        .await;

        match result {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(AppError::Llm(format!("intent extraction failed: {e}"))),
            Err(_) => Err(AppError::Llm(format!(
                "intent extraction timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

pub struct LlmQuestionGenerator {
    llm: LlmClient,
    timeout: Duration,
}

impl LlmQuestionGenerator {
    pub fn new(llm: LlmClient, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    async fn bounded_text(&self, prompt: &str) -> Result<String, AppError> {
        let result =
            tokio::time::timeout(self.timeout, self.llm.call_text(prompt, ADVISOR_SYSTEM)).await;

        match result {
            Ok(Ok(text)) if !text.is_empty() => Ok(text),
            Ok(Ok(_)) => Err(AppError::Llm("generator returned empty text".to_string())),
            Ok(Err(e)) => Err(AppError::Llm(format!("generation failed: {e}"))),
            Err(_) => Err(AppError::Llm(format!(
                "generation timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl QuestionGenerator for LlmQuestionGenerator {
    async fn next_question(
        &self,
        insights: &ExtractedInsight,
        turn: u32,
        candidate_count: usize,
    ) -> Result<String, AppError> {
        let prompt = prompts::build_question_prompt(insights, turn, candidate_count);
        self.bounded_text(&prompt).await
    }

    async fn match_reasoning(
        &self,
        job: &JobCandidate,
        insights: &ExtractedInsight,
    ) -> Result<String, AppError> {
        let prompt = prompts::build_reasoning_prompt(job, insights);
        self.bounded_text(&prompt).await
    }
}

// ─── Static fallbacks ──────────────────────────────────────────────────────

/// Canned interview question for the given turn, used whenever the question
/// generator fails or times out. Turns past the scripted range get a generic
/// follow-up.
pub fn fallback_question(turn: u32) -> &'static str {
    match turn {
        1 => "あなたにとって理想の職場環境について教えてください。",
        2 => "どのようなチームと働きたいですか？",
        3 => "職場で重視することは何ですか？",
        4 => "どのような成長機会を求めていますか？",
        5 => "働き方で妥協できないことは何ですか？",
        _ => "他に重視することはありますか？",
    }
}

/// Canned recommendation reasoning used when per-posting reasoning fails.
pub const FALLBACK_REASONING: &str = "あなたの希望条件に合致しています。";

/// Logs the degradation and returns the fallback question.
pub fn degrade_question(turn: u32, error: &AppError) -> String {
    warn!("Question generation degraded to fallback: {error}");
    fallback_question(turn).to_string()
}
