//! OpenAI chat-completions adapter.

use async_trait::async_trait;

use super::{ChunkStream, CredentialStatus, ModelInfo, OpenAiCompatBackend, ProviderAdapter, ProviderKind};
use crate::error::Result;
use crate::proxy::types::{ChatMessage, GenerationConfig};

const MODELS: [ModelInfo; 4] = [
    ModelInfo {
        id: "gpt-4.1",
        name: "GPT-4.1",
        vision: true,
        audio: false,
        function_calling: true,
        reasoning: None,
    },
    ModelInfo {
        id: "gpt-4.1-mini",
        name: "GPT-4.1 mini",
        vision: true,
        audio: false,
        function_calling: true,
        reasoning: None,
    },
    ModelInfo {
        id: "gpt-4o",
        name: "GPT-4o",
        vision: true,
        audio: true,
        function_calling: true,
        reasoning: None,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        name: "GPT-4o mini",
        vision: true,
        audio: false,
        function_calling: true,
        reasoning: None,
    },
];

/// OpenAI backend. Uses the default request mapping unchanged.
pub struct OpenAiAdapter {
    backend: OpenAiCompatBackend,
}

impl OpenAiAdapter {
    pub fn new(backend: OpenAiCompatBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        self.backend.provider()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        MODELS.to_vec()
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<ChunkStream> {
        let request = self.build_request(messages, config);
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
    use crate::providers::{CredentialPool, DEFAULT_TEMPERATURE};
    use crate::proxy::types::ReasoningEffort;
    use std::time::Duration;

    fn adapter() -> OpenAiAdapter {
        let pool = CredentialPool::new("openai", vec![ApiKey::from("sk-test")]).unwrap();
        OpenAiAdapter::new(OpenAiCompatBackend::new(
            "openai",
            ProviderKind::OpenAi.default_base_url(),
            reqwest::Client::new(),
            pool,
            Duration::from_secs(5),
        ))
    }

    #[test]
    fn default_request_mapping() {
        let adapter = adapter();
        let messages = vec![ChatMessage::user("hi")];
        let mut config = GenerationConfig::new("gpt-4o");
        config.max_tokens = Some(256);
        config.reasoning_effort = Some(ReasoningEffort::High);

        let request = adapter.build_request(&messages, &config);
        assert_eq!(request.model, "gpt-4o");
        assert!(request.stream);
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.reasoning_effort, None);
        assert_eq!(request.messages, messages);
    }

    #[test]
    fn explicit_temperature_passes_through() {
        let adapter = adapter();
        let mut config = GenerationConfig::new("gpt-4o-mini");
        config.temperature = Some(0.2);
        let request = adapter.build_request(&[ChatMessage::user("hi")], &config);
        assert_eq!(request.temperature, 0.2);
    }

    #[test]
    fn catalog_has_no_reasoning_models() {
        let models = adapter().available_models();
        assert_eq!(models.len(), 4);
        assert!(models.iter().all(|m| m.reasoning.is_none()));
    }
}
