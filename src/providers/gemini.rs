//! Gemini adapter over Google's OpenAI-compatible endpoint.
//!
//! Gemini 2.5 models accept a `reasoning_effort` field. Pro cannot turn
//! thinking off, so a requested `none` is raised to the lowest active level.

use async_trait::async_trait;

use super::{
    find_model, ChunkStream, CredentialStatus, ModelInfo, OpenAiCompatBackend, ProviderAdapter,
    ProviderKind, ReasoningSupport,
};
use crate::error::Result;
use crate::proxy::types::{ChatCompletionRequest, ChatMessage, GenerationConfig, ReasoningEffort};

const ALWAYS_REASONS: ReasoningSupport = ReasoningSupport {
    levels: &[ReasoningEffort::Low, ReasoningEffort::Medium, ReasoningEffort::High],
    required: true,
};

const OPTIONAL_REASONING: ReasoningSupport = ReasoningSupport {
    levels: &[
        ReasoningEffort::None,
        ReasoningEffort::Low,
        ReasoningEffort::Medium,
        ReasoningEffort::High,
    ],
    required: false,
};

const MODELS: [ModelInfo; 4] = [
    ModelInfo {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        vision: true,
        audio: true,
        function_calling: true,
        reasoning: Some(ALWAYS_REASONS),
    },
    ModelInfo {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        vision: true,
        audio: true,
        function_calling: true,
        reasoning: Some(OPTIONAL_REASONING),
    },
    ModelInfo {
        id: "gemini-2.5-flash-lite",
        name: "Gemini 2.5 Flash-Lite",
        vision: true,
        audio: true,
        function_calling: true,
        reasoning: Some(OPTIONAL_REASONING),
    },
    ModelInfo {
        id: "gemini-2.0-flash",
        name: "Gemini 2.0 Flash",
        vision: true,
        audio: true,
        function_calling: true,
        reasoning: None,
    },
];

pub struct GeminiAdapter {
    backend: OpenAiCompatBackend,
}

impl GeminiAdapter {
    pub fn new(backend: OpenAiCompatBackend) -> Self {
        Self { backend }
    }

    /// Reasoning capability for a model id.
    ///
    /// Catalog entries win; unlisted ids containing `2.5` are treated as
    /// optional-reasoning models so new point releases keep working.
    fn reasoning_support(model: &str) -> Option<ReasoningSupport> {
        match find_model(&MODELS, model) {
            Some(info) => info.reasoning.clone(),
            None if model.contains("2.5") => Some(OPTIONAL_REASONING),
            None => None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        self.backend.provider()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        MODELS.to_vec()
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> ChatCompletionRequest {
        let mut request = ChatCompletionRequest {
            model: config.model.clone(),
            messages: messages.to_vec(),
            stream: true,
            temperature: config.temperature.unwrap_or(super::DEFAULT_TEMPERATURE),
            max_tokens: config.max_tokens,
            reasoning_effort: None,
        };

        if let Some(support) = Self::reasoning_support(&config.model) {
            request.reasoning_effort = config
                .reasoning_effort
                .map(|requested| support.effective(requested));
        }

        request
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<ChunkStream> {
        let request = self.build_request(messages, config);
        if request.reasoning_effort != config.reasoning_effort {
            tracing::debug!(
                model = %config.model,
                requested = ?config.reasoning_effort,
                effective = ?request.reasoning_effort,
                "Adjusted reasoning effort for model"
            );
        }
        self.backend.open_stream(&request).await
    }

    fn credential_status(&self) -> Vec<CredentialStatus> {
        self.backend.pool().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::providers::CredentialPool;
    use std::time::Duration;

    fn adapter() -> GeminiAdapter {
        let pool = CredentialPool::new("gemini", vec![ApiKey::from("g-key")]).unwrap();
        GeminiAdapter::new(OpenAiCompatBackend::new(
            "gemini",
            ProviderKind::Gemini.default_base_url(),
            reqwest::Client::new(),
            pool,
            Duration::from_secs(5),
        ))
    }

    fn request_for(model: &str, effort: Option<ReasoningEffort>) -> ChatCompletionRequest {
        let mut config = GenerationConfig::new(model);
        config.reasoning_effort = effort;
        adapter().build_request(&[ChatMessage::user("hi")], &config)
    }

    #[test]
    fn pro_upgrades_none_to_low() {
        let request = request_for("gemini-2.5-pro", Some(ReasoningEffort::None));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::Low));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["reasoning_effort"], "low");
    }

    #[test]
    fn pro_keeps_explicit_level() {
        let request = request_for("gemini-2.5-pro", Some(ReasoningEffort::High));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn flash_may_disable_reasoning() {
        let request = request_for("gemini-2.5-flash", Some(ReasoningEffort::None));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::None));
    }

    #[test]
    fn non_reasoning_model_never_sends_effort() {
        let request = request_for("gemini-2.0-flash", Some(ReasoningEffort::High));
        assert_eq!(request.reasoning_effort, None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("reasoning_effort"));
    }

    #[test]
    fn unset_effort_is_not_sent() {
        let request = request_for("gemini-2.5-pro", None);
        assert_eq!(request.reasoning_effort, None);
    }

    #[test]
    fn unlisted_2_5_model_gets_optional_reasoning() {
        let request = request_for("gemini-2.5-flash-preview-09-2025", Some(ReasoningEffort::Medium));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::Medium));
    }

    #[test]
    fn default_temperature_applied() {
        let request = request_for("gemini-2.5-flash", None);
        assert_eq!(request.temperature, 0.7);
        assert!(request.stream);
    }
}
