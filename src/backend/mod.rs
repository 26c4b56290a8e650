//! Text-generation backend access.
//!
//! The router only sees [`GenerationBackend`]; [`GenerationClient`] is the
//! HTTP implementation that talks to an Ollama-compatible server.

mod client;

use async_trait::async_trait;

use crate::{
    error::BackendError,
    model::{ChatMessage, GenerationRequest, GenerationResponse},
};

pub use client::{GenerationClient, PROBE_TIMEOUT};

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Cheap reachability probe. Never errors.
    async fn is_available(&self) -> bool;

    /// Installed model names, empty when the backend cannot be reached.
    async fn list_models(&self) -> Vec<String>;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, BackendError>;

    async fn chat(
        &self,
        history: &[ChatMessage],
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, BackendError>;
}
