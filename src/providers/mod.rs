//! Provider adapters.
//!
//! Each backend family implements [`ProviderAdapter`]. Adapters own a
//! [`CredentialPool`] through the shared [`OpenAiCompatBackend`] rather than
//! inheriting pool state, so pool behaviour is testable on its own.

mod gemini;
mod openai;
pub mod openai_compat;
pub mod pool;
mod registry;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use openai_compat::OpenAiCompatBackend;
pub use pool::{is_rate_limit_error, CredentialPool, CredentialStatus};
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::proxy::frame::StreamChunk;
use crate::proxy::types::{ChatCompletionRequest, ChatMessage, GenerationConfig, ReasoningEffort};

/// Temperature sent upstream when the caller does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Uniform chunk sequence produced by an adapter once the upstream is open.
///
/// Mid-stream failures arrive as [`StreamChunk::Error`] items, never as a
/// panic or a dropped stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send + 'static>>;

/// Backend families the gateway knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Fixed endpoint for the family's OpenAI-compatible API.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning capability of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasoningSupport {
    /// Levels the model accepts, lowest first.
    pub levels: &'static [ReasoningEffort],
    /// The model always reasons; `none` is not accepted.
    pub required: bool,
}

impl ReasoningSupport {
    /// Lowest level that actually turns reasoning on.
    pub fn minimum_active_level(&self) -> ReasoningEffort {
        self.levels
            .iter()
            .copied()
            .find(|level| *level != ReasoningEffort::None)
            .unwrap_or(ReasoningEffort::Low)
    }

    /// Resolve the effort to send for a requested level.
    pub fn effective(&self, requested: ReasoningEffort) -> ReasoningEffort {
        if self.required && requested == ReasoningEffort::None {
            self.minimum_active_level()
        } else {
            requested
        }
    }
}

/// Static description of a model a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub vision: bool,
    pub audio: bool,
    pub function_calling: bool,
    pub reasoning: Option<ReasoningSupport>,
}

/// Uniform contract over one backend's chat-completion API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry identifier (the `provider` field clients send).
    fn name(&self) -> &str;

    /// Backend family.
    fn kind(&self) -> ProviderKind;

    /// Static model catalog.
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Build the backend request body.
    ///
    /// The default maps messages and config straight across. Backends with
    /// extra knobs override this.
    fn build_request(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: config.model.clone(),
            messages: messages.to_vec(),
            stream: true,
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: config.max_tokens,
            reasoning_effort: None,
        }
    }

    /// Open the upstream stream.
    ///
    /// Errors here mean nothing was streamed and are returned as
    /// [`crate::Error::ProviderUnavailable`]. Once the stream is returned,
    /// failures are reported in-band as an error chunk.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<ChunkStream>;

    /// Credential health for introspection. Adapters without a pool report none.
    fn credential_status(&self) -> Vec<CredentialStatus> {
        Vec::new()
    }
}

/// Look up a model in a catalog by id.
pub fn find_model<'a>(models: &'a [ModelInfo], id: &str) -> Option<&'a ModelInfo> {
    models.iter().find(|m| m.id == id)
}
