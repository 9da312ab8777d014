//! # transcraft-provider
//!
//! The chat-completion side of transcraft.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based chat-client abstraction (`LlmProvider::invoke_chat`)
//! - **OpenAIProvider**: OpenAI-compatible HTTP backend
//! - **ScriptedProvider**: Deterministic in-memory backend for tests
//! - **Readiness**: Wait for a model server to come up and discover its model

pub mod provider;
pub mod readiness;

pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, OpenAIProvider,
    ProviderConfig, ProviderError, Role, ScriptedProvider, Usage, ENV_API_KEY, ENV_BASE_URL,
    ENV_MODEL,
};
pub use readiness::{probe, wait_until_ready, ReadinessConfig};
