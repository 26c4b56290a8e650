use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_K: i64 = 40;
pub const DEFAULT_TOP_P: f64 = 0.9;

/// A validated inbound request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: String,
    pub prompt: String,
    pub model: Option<String>,
    pub sampling: SamplingParams,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Builds a request, assigning a fresh identifier when none was supplied.
    pub fn new(
        id: Option<String>,
        prompt: impl Into<String>,
        model: Option<String>,
        sampling: SamplingParams,
    ) -> Self {
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id,
            prompt: prompt.into(),
            model,
            sampling,
            created_at: Utc::now(),
        }
    }
}

/// Optional sampling controls. Values are forwarded as given, without clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_k: Option<i64>,
    pub top_p: Option<f64>,
}

impl SamplingParams {
    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn top_k(&self) -> i64 {
        self.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    pub fn top_p(&self) -> f64 {
        self.top_p.unwrap_or(DEFAULT_TOP_P)
    }

    /// Names of parameters outside their documented ranges.
    pub fn out_of_range(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.temperature.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
            fields.push("temperature");
        }
        if self.top_k.is_some_and(|k| k <= 0) {
            fields.push("topK");
        }
        if self.top_p.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
            fields.push("topP");
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Token accounting. `total` is always `prompt + completion`. Only built
/// through [`TokenUsage::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    prompt: u64,
    completion: u64,
    total: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt.saturating_add(completion),
        }
    }

    pub fn prompt(&self) -> u64 {
        self.prompt
    }

    pub fn completion(&self) -> u64 {
        self.completion
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub id: String,
    pub prompt: String,
    pub model: String,
    pub response: String,
    pub tokens: TokenUsage,
    /// Milliseconds from dispatch to backend reply.
    pub processing_time: u64,
    pub timestamp: DateTime<Utc>,
}
