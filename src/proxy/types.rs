//! Gateway request types and the OpenAI-compatible upstream request body.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Reference to an image attached to a message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// A chat message. Read-only once handed to the gateway.
///
/// The client-side `id` is accepted but never forwarded upstream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// How much internal deliberation a model should do before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

/// Per-request generation settings handed to a provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl GenerationConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub messages: Vec<ChatMessage>,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_prompt_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl GatewayRequest {
    /// Reject payloads that cannot be routed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.provider.trim().is_empty() {
            return Err(Error::BadRequest("provider must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::BadRequest("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(Error::BadRequest("messages must not be empty".to_string()));
        }
        // System messages are replaced during assembly and do not count.
        if self.messages.iter().all(|m| m.role == Role::System) {
            return Err(Error::BadRequest(
                "messages must include a user or assistant message".to_string(),
            ));
        }
        Ok(())
    }

    /// Generation settings for the adapter.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            reasoning_effort: self.reasoning_effort,
        }
    }

    /// Message list to send upstream, with the gateway-owned system message.
    pub fn upstream_messages(&self) -> Vec<ChatMessage> {
        assemble_messages(
            self.system_instruction.as_deref(),
            self.active_prompt_content.as_deref(),
            &self.messages,
        )
    }
}

/// Join the system instruction and active prompt, skipping blank parts.
///
/// Non-blank parts are joined as given. Returns `None` when both are blank.
pub fn effective_system_instruction(
    system_instruction: Option<&str>,
    active_prompt: Option<&str>,
) -> Option<String> {
    let parts: Vec<&str> = [system_instruction, active_prompt]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Build the upstream message list.
///
/// Caller-supplied `system` messages are dropped so the only system message
/// is the one assembled here, placed first.
pub fn assemble_messages(
    system_instruction: Option<&str>,
    active_prompt: Option<&str>,
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let system = effective_system_instruction(system_instruction, active_prompt);
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(text) = system {
        messages.push(ChatMessage::system(text));
    }
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned(),
    );
    messages
}

/// Chat completion request sent to an OpenAI-compatible backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// Streaming chunk from an OpenAI-compatible backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A streaming choice delta.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_system(messages: &[ChatMessage]) -> usize {
        messages.iter().filter(|m| m.role == Role::System).count()
    }

    #[test]
    fn deserializes_gateway_request() {
        let json = r#"{
            "messages": [
                {"id": "m1", "role": "user", "content": "hi"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "https://img.example/cat.png"}}
                ]}
            ],
            "provider": "gemini",
            "model": "gemini-2.5-pro",
            "systemInstruction": "Be brief.",
            "activePromptContent": "You are a pirate.",
            "maxTokens": 512,
            "reasoningEffort": "none"
        }"#;

        let request: GatewayRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].id.as_deref(), Some("m1"));
        assert!(matches!(request.messages[1].content, MessageContent::Parts(ref p) if p.len() == 2));
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::None));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_identifiers() {
        let mut request = GatewayRequest {
            messages: vec![ChatMessage::user("hi")],
            provider: " ".to_string(),
            model: "gpt-4o".to_string(),
            system_instruction: None,
            active_prompt_content: None,
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        };
        assert!(matches!(request.validate(), Err(Error::BadRequest(_))));

        request.provider = "openai".to_string();
        request.model = String::new();
        assert!(matches!(request.validate(), Err(Error::BadRequest(_))));
    }

    #[test]
    fn system_parts_joined_by_blank_line() {
        let messages = assemble_messages(
            Some("Be brief."),
            Some("You are a pirate."),
            &[ChatMessage::user("hi")],
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].content,
            MessageContent::Text("Be brief.\n\nYou are a pirate.".to_string())
        );
    }

    #[test]
    fn validate_rejects_system_only_history() {
        let request = GatewayRequest {
            messages: vec![ChatMessage::system("only instructions")],
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            system_instruction: None,
            active_prompt_content: None,
            temperature: None,
            max_tokens: None,
            reasoning_effort: None,
        };
        assert!(matches!(request.validate(), Err(Error::BadRequest(_))));
    }

    #[test]
    fn system_parts_keep_their_text() {
        let joined = effective_system_instruction(Some("  Be brief.\n"), Some("\tYou are a pirate."));
        assert_eq!(joined.as_deref(), Some("  Be brief.\n\n\n\tYou are a pirate."));
    }

    #[test]
    fn exactly_one_system_message_replaces_embedded_ones() {
        let history = vec![
            ChatMessage::system("old system"),
            ChatMessage::user("hi"),
            ChatMessage::system("another"),
            ChatMessage::assistant("hello"),
        ];
        let messages = assemble_messages(Some("configured"), None, &history);

        assert_eq!(count_system(&messages), 1);
        assert_eq!(messages[0].content, MessageContent::Text("configured".to_string()));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
    }

    #[test]
    fn empty_parts_are_omitted() {
        let messages = assemble_messages(Some("  "), Some("prompt only"), &[ChatMessage::user("hi")]);
        assert_eq!(messages[0].content, MessageContent::Text("prompt only".to_string()));

        let messages = assemble_messages(Some(""), None, &[ChatMessage::system("x"), ChatMessage::user("hi")]);
        assert_eq!(count_system(&messages), 0);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn upstream_messages_omit_client_ids() {
        let mut message = ChatMessage::user("hi");
        message.id = Some("client-id-1".to_string());
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn completion_request_omits_unset_fields() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            temperature: 0.7,
            max_tokens: None,
            reasoning_effort: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("max_tokens"), "{}", json);
        assert!(!json.contains("reasoning_effort"), "{}", json);
        assert!(json.contains(r#""stream":true"#));
    }
}
