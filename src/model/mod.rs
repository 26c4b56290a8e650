mod types;

pub use types::{
    ChatMessage, ChatRole, DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_TOP_P, GenerationRequest,
    GenerationResponse, SamplingParams, TokenUsage,
};
