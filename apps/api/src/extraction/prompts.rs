//! Prompt builders for intent extraction and conversational output.
//! All prompts address Japanese job seekers; extraction output is JSON.

use crate::matching::insights::ExtractedInsight;
use crate::models::job::JobCandidate;

/// Builds the intent-extraction prompt for one user message. The running
/// insight state is included so the extractor reads the message in context
/// rather than in isolation.
pub fn build_extraction_prompt(message: &str, current: &ExtractedInsight) -> String {
    let accumulated = serde_json::to_string(current).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"あなたは転職支援サービスの意図抽出エンジンです。
求職者のメッセージから、仕事選びに関する希望・価値観・懸念を抽出してください。

## これまでに抽出済みの情報
{accumulated}

## 今回の求職者メッセージ
{message}

## 出力形式
以下のJSONのみを出力してください。該当しないフィールドは省略可です。

{{
  "explicit_preferences": {{
    "remote_work": "強く希望 | 希望 | 不要 のいずれか（言及があれば）",
    "learning_interest": "学びたい技術・分野（言及があれば）",
    "work_life_balance": "重視（言及があれば）",
    "flexible_hours": "希望（言及があれば）"
  }},
  "implicit_values": {{
    "career_growth_priority": 1,
    "stability_priority": 1,
    "work_life_balance_priority": 1
  }},
  "pain_points": ["現職への不満があれば"],
  "keywords": ["メッセージ中の重要キーワード"],
  "confidence": 0.0,
  "job_change_request": {{
    "requested": false,
    "new_job_titles": ["別の職種を見たいと言った場合のみ"],
    "reason": ""
  }},
  "alternative_condition_acceptance": {{
    "accepted": false,
    "condition_type": "work_hours など",
    "details": "",
    "reason": ""
  }}
}}

## ルール
- implicit_values の値は1〜5の整数。言及のない軸は省略する。
- confidence は抽出全体の確信度（0.0〜1.0）。
- 「エンジニアも見たい」のように別職種への言及があれば job_change_request を立てる。
- 提案済みの代替条件（例: フルリモートの代わりにフレックス勤務）を受け入れた場合のみ
  alternative_condition_acceptance を立てる。
- 推測で埋めない。メッセージに根拠のある情報だけを抽出する。"#
    )
}

/// Builds the next-question prompt. The generator sees what is already known
/// so it asks about the least-covered axis instead of repeating itself.
pub fn build_question_prompt(
    insights: &ExtractedInsight,
    turn: u32,
    candidate_count: usize,
) -> String {
    let known = serde_json::to_string(insights).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"あなたは転職支援サービスのキャリアアドバイザーです。
求職者との対話は現在{turn}ターン目で、候補求人は{candidate_count}件あります。

## これまでに把握した希望・価値観
{known}

次にする質問を1つだけ、日本語で出力してください。

## ルール
- まだ把握できていない軸（働き方、職場環境、成長機会、譲れない条件など）を優先する。
- 質問文のみを出力する。前置きや説明は不要。
- 1〜2文の自然な問いかけにする。"#
    )
}

/// Builds the match-reasoning prompt for one recommended posting.
pub fn build_reasoning_prompt(job: &JobCandidate, insights: &ExtractedInsight) -> String {
    let known = serde_json::to_string(insights).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"あなたは転職支援サービスのキャリアアドバイザーです。
以下の求人を求職者に勧める理由を、日本語で1〜2文で説明してください。

## 求人
職種: {title}
会社: {company}
勤務地: {location}
想定年収: {salary_min}万円〜{salary_max}万円

## 求職者の希望・価値観
{known}

## ルール
- 求職者が実際に述べた希望と求人の特徴を結びつける。
- 説明文のみを出力する。"#,
        title = job.title,
        company = job.company_name,
        location = job.location,
        salary_min = job.salary_min,
        salary_max = job.salary_max,
    )
}
