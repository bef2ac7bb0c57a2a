//! Chat completion against any OpenAI-compatible endpoint (OpenAI, Groq, local servers).

use anyhow::Result;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
                          ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
                          CreateChatCompletionRequestArgs};
use async_trait::async_trait;
use log::debug;

use crate::pipeline::errors::PipelineError;
use crate::utils::llm::{ChatMessage, Complete, Role};

/// OpenAI-compatible endpoint of Groq.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Settings of a chat conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u16>,
    pub api_base: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            model: "llama3-8b-8192".to_string(),
            temperature: Some(0.0),
            max_tokens: None,
            api_base: GROQ_API_BASE.to_string(),
        }
    }
}

/// Chat model backed by `async_openai`.
#[derive(Clone, Debug)]
pub struct OpenAIChat {
    pub client: Client<OpenAIConfig>,
    pub config: ConversationConfig,
}

impl OpenAIChat {
    pub fn new(api_key: impl Into<String>, config: ConversationConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.api_base.clone());
        Self {
            client: Client::with_config(openai_config),
            config,
        }
    }

    /// Reads the API key from `api_key_var`. Fails with [PipelineError::MissingCredential] when it is unset or empty.
    pub fn from_env(api_key_var: &str, config: ConversationConfig) -> Result<Self, PipelineError> {
        let api_key = crate::config::require_credential(api_key_var)?;
        Ok(Self::new(api_key, config))
    }

    fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
        let content = message.content.as_str();
        let msg = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?
                .into(),
        };
        Ok(msg)
    }
}

#[async_trait]
impl Complete for OpenAIChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request_messages = messages.iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.config.model.as_str()).messages(request_messages);
        if let Some(temperature) = self.config.temperature {
            args.temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            args.max_tokens(max_tokens);
        }
        let request = args.build()?;
        debug!("chat completion: model = {}, {} messages", self.config.model, messages.len());
        let response = self.client.chat().create(request).await
            .map_err(|e| PipelineError::upstream("chat completion", e))?;
        response.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::malformed("a chat completion with content", "<empty response>").into())
    }
}

#[cfg(test)]
mod test_openai {
    use super::{ConversationConfig, OpenAIChat, GROQ_API_BASE};

    #[test]
    fn test_default_config_targets_groq() {
        let config = ConversationConfig::default();
        assert_eq!(config.api_base, GROQ_API_BASE);
        assert_eq!(config.temperature, Some(0.0));
    }

    #[test]
    fn test_missing_key_fails_fast() {
        let err = OpenAIChat::from_env("PIPEPROMPT_TEST_SURELY_UNSET_KEY", ConversationConfig::default())
            .expect_err("missing key must fail");
        assert!(err.to_string().contains("PIPEPROMPT_TEST_SURELY_UNSET_KEY"));
    }
}
