//! Application settings. Every value has a default; environment variables override them.

use std::env;
use std::str::FromStr;
use log::warn;

use crate::pipeline::errors::PipelineError;
use crate::utils::llm::openai::ConversationConfig;

/// Environment variable holding the chat model API key.
pub const API_KEY_VAR: &str = "GROQ_API_KEY";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_key_var: String,
    pub conversation: ConversationConfig,
    /// Links searched per generated query.
    pub results_per_question: usize,
    /// Characters of a scraped page kept before summarization.
    pub max_page_chars: usize,
    /// Upper bound of in-flight fan-out elements.
    pub concurrency: usize,
    /// Documents retrieved per question.
    pub retrieval_k: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key_var: API_KEY_VAR.to_string(),
            conversation: ConversationConfig::default(),
            results_per_question: 3,
            max_page_chars: 10_000,
            concurrency: 4,
            retrieval_k: 8,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `PIPEPROMPT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(model) = lookup("PIPEPROMPT_MODEL") {
            config.conversation.model = model;
        }
        if let Some(api_base) = lookup("PIPEPROMPT_API_BASE") {
            config.conversation.api_base = api_base;
        }
        if let Some(temperature) = parse_var(&lookup, "PIPEPROMPT_TEMPERATURE") {
            config.conversation.temperature = Some(temperature);
        }
        if let Some(n) = parse_var(&lookup, "PIPEPROMPT_RESULTS_PER_QUESTION") {
            config.results_per_question = n;
        }
        if let Some(n) = parse_var(&lookup, "PIPEPROMPT_MAX_PAGE_CHARS") {
            config.max_page_chars = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "PIPEPROMPT_CONCURRENCY") {
            config.concurrency = n.max(1);
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {} = {:?}: not a valid value", key, raw);
            None
        }
    }
}

/// Reads a credential from the environment, failing with [PipelineError::MissingCredential] if it is unset or blank.
pub fn require_credential(var: &str) -> Result<String, PipelineError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::MissingCredential { variable: var.to_string() }),
    }
}
