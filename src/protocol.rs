//! JSON messages exchanged with the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::BridgeError,
    model::{ChatMessage, ChatRole, GenerationRequest, GenerationResponse, SamplingParams},
};

pub const SEMANTIC_REQUEST: &str = "semantic_request";
pub const SEMANTIC_CHAT: &str = "semantic_chat";

// Relay peers are loosely typed. Scalar fields accept any JSON shape that
// carries a usable value, and anything else reads as absent.

fn loose_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn loose_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Integral floats such as `40.0` keep their value. Fractions truncate toward zero.
fn loose_i64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    let from_f64 = |f: f64| f.is_finite().then(|| f.trunc() as i64);
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(from_f64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse().ok().and_then(from_f64))
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticRequest {
    #[serde(default, deserialize_with = "loose_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "loose_i64")]
    pub top_k: Option<i64>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub top_p: Option<f64>,
}

impl SemanticRequest {
    pub fn into_request(self) -> GenerationRequest {
        GenerationRequest::new(
            self.id,
            self.prompt.unwrap_or_default(),
            self.model,
            SamplingParams {
                temperature: self.temperature,
                top_k: self.top_k,
                top_p: self.top_p,
            },
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticChat {
    #[serde(default, deserialize_with = "loose_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, deserialize_with = "loose_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "loose_i64")]
    pub top_k: Option<i64>,
    #[serde(default, deserialize_with = "loose_f64")]
    pub top_p: Option<f64>,
}

impl SemanticChat {
    /// Splits into the history and a request whose prompt is the last user turn.
    pub fn into_parts(self) -> (Vec<ChatMessage>, GenerationRequest) {
        let prompt = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let request = GenerationRequest::new(
            self.id,
            prompt,
            self.model,
            SamplingParams {
                temperature: self.temperature,
                top_k: self.top_k,
                top_p: self.top_p,
            },
        );
        (self.messages, request)
    }
}

#[derive(Debug, Clone)]
pub enum InboundMessage {
    Request(SemanticRequest),
    Chat(SemanticChat),
    /// A known type whose body could not be read. Answered with a
    /// `semantic_error` under `id`.
    Invalid { id: String, reason: String },
    Unrecognized(String),
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| BridgeError::MalformedMessage(format!("invalid JSON: {e}")))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::MalformedMessage("missing string field 'type'".into()))?
            .to_string();

        let id = match value.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let parsed = match kind.as_str() {
            SEMANTIC_REQUEST => serde_json::from_value(value).map(InboundMessage::Request),
            SEMANTIC_CHAT => serde_json::from_value(value).map(InboundMessage::Chat),
            _ => return Ok(InboundMessage::Unrecognized(kind)),
        };
        Ok(parsed.unwrap_or_else(|e| InboundMessage::Invalid {
            id,
            reason: format!("invalid {kind}: {e}"),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    SemanticResponse(GenerationResponse),
    SemanticError(ErrorReport),
}

impl OutboundMessage {
    pub fn error(id: impl Into<String>, error: impl ToString) -> Self {
        OutboundMessage::SemanticError(ErrorReport {
            id: id.into(),
            error: error.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            OutboundMessage::SemanticResponse(response) => &response.id,
            OutboundMessage::SemanticError(report) => &report.id,
        }
    }
}
