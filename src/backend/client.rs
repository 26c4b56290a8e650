use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    backend::GenerationBackend,
    config::BridgeConfig,
    error::BackendError,
    model::{ChatMessage, GenerationRequest, GenerationResponse, TokenUsage},
};

/// Timeout for the `/api/tags` availability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Option<ChatReplyMessage>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: String,
}

/// HTTP client for an Ollama-compatible generation server.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: Client,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.backend_url.clone(),
            config.default_model.clone(),
            config.backend_timeout,
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn resolve_model(&self, request: &GenerationRequest) -> String {
        request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }

    async fn fetch_tags(&self) -> Result<TagsReply, BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, PROBE_TIMEOUT))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, PROBE_TIMEOUT))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), "backend returned error status");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))
    }
}

#[async_trait]
impl GenerationBackend for GenerationClient {
    async fn is_available(&self) -> bool {
        match self.fetch_tags().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "backend probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<String> {
        match self.fetch_tags().await {
            Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
            Err(err) => {
                warn!(error = %err, "failed to list backend models");
                Vec::new()
            }
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, BackendError> {
        let model = self.resolve_model(request);
        let body = json!({
            "model": model,
            "prompt": request.prompt,
            "temperature": request.sampling.temperature(),
            "top_k": request.sampling.top_k(),
            "top_p": request.sampling.top_p(),
            "stream": false,
        });

        debug!(id = %request.id, %model, "dispatching generate");
        let start = Instant::now();
        let reply: GenerateReply = self.post_json("/api/generate", &body).await?;
        let processing_time = start.elapsed().as_millis() as u64;

        Ok(GenerationResponse {
            id: request.id.clone(),
            prompt: request.prompt.clone(),
            model,
            response: reply.response,
            tokens: TokenUsage::new(
                reply.prompt_eval_count.unwrap_or(0),
                reply.eval_count.unwrap_or(0),
            ),
            processing_time,
            timestamp: Utc::now(),
        })
    }

    async fn chat(
        &self,
        history: &[ChatMessage],
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, BackendError> {
        let model = self.resolve_model(request);
        let body = json!({
            "model": model,
            "messages": history,
            "temperature": request.sampling.temperature(),
            "stream": false,
        });

        debug!(id = %request.id, %model, turns = history.len(), "dispatching chat");
        let start = Instant::now();
        let reply: ChatReply = self.post_json("/api/chat", &body).await?;
        let processing_time = start.elapsed().as_millis() as u64;

        Ok(GenerationResponse {
            id: request.id.clone(),
            prompt: request.prompt.clone(),
            model,
            response: reply.message.map(|m| m.content).unwrap_or_default(),
            tokens: TokenUsage::new(
                reply.prompt_eval_count.unwrap_or(0),
                reply.eval_count.unwrap_or(0),
            ),
            processing_time,
            timestamp: Utc::now(),
        })
    }
}
