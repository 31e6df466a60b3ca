use serde::{Deserialize, Serialize};

/// The user's stated baseline: desired title(s), location(s), and minimum
/// salary (in 万円). Set once during onboarding and never mutated by the
/// matching core.
///
/// `job_title` and `location` may hold comma-separated alternates
/// ("Webデザイナー,UIデザイナー"); use [`UserBaseline::titles`] /
/// [`UserBaseline::locations`] to get the split token lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBaseline {
    pub user_id: i64,
    pub job_title: String,
    pub location: String,
    pub min_salary: i64,
}

impl UserBaseline {
    pub fn titles(&self) -> Vec<String> {
        split_alternates(&self.job_title)
    }

    pub fn locations(&self) -> Vec<String> {
        split_alternates(&self.location)
    }
}

fn split_alternates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
