//! # Prompt
//! A prompt is simply a string
//! ## PromptTemplate
//! A prompt template is a string with placeholders.
//!
//! ## Placeholder
//! A placeholder is a string in the format of `{name}`, where `name` is an identifier (`[A-Za-z_][A-Za-z0-9_]*`).
//! Braces around anything else, like the JSON examples that often appear in prompts, are plain text.
//!
//! ## PartialPrompt
//! A partial prompt is a prompt template with some placeholders filled. A partial prompt can be only constructed from a prompt template via [PromptTemplate::construct_prompt].
//!
//! The placeholders in a partial prompt can be filled with values via [PartialPrompt::try_fill], which can also update the filling values.
//! When all placeholders are filled, the partial prompt can be completed via [PartialPrompt::complete], in which the placeholders in a template are **actually** replaced with the filling values.
//!
//! ## ChatPromptTemplate
//! An ordered list of role-tagged [MessageTemplate]s. [ChatPromptTemplate::format] fills every fragment from one
//! record and yields the chat messages sent to a model.
//!
//! ```
//! use pipeprompt::prompt::ChatPromptTemplate;
//! use pipeprompt::utils::JsonMap;
//! use serde_json::json;
//!
//! let template = ChatPromptTemplate::new()
//!     .with_system("You are a helpful assistant.")
//!     .with_user("{user_query}");
//! let mut record = JsonMap::new();
//! record.insert("user_query".to_string(), json!("reverse a string in Rust"));
//! let messages = template.format(&record).unwrap();
//! assert_eq!(messages[1].content, "reverse a string in Rust");
//! ```


use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use anyhow::Result;
use log::warn;
use serde_json::Value;
use crate::filler::{Fill, RecordFiller};
use crate::pipeline::errors::PipelineError;
use crate::prompt::errors::{PlaceholderNotExist, UnfilledPlaceholders};
use crate::utils::JsonMap;
use crate::utils::llm::{ChatMessage, Role};
use crate::utils::prompt_processing::{get_placeholders, replace_all_placeholders};


/// A prompt template with some placeholders filled. A partial prompt can be only constructed from a prompt template via [PromptTemplate::construct_prompt].
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PartialPrompt {
    /// The template of the partial prompt, readonly
    #[readonly]
    pub template: PromptTemplate,

    /// Mapping from placeholder name to its filling value
    pub(crate) placeholder_to_vals: HashMap<String, Option<String>>,

    /// Record the placeholders that are not filled yet
    pub(crate) unfilled_placeholders: HashSet<String>,
}

impl PartialPrompt {
    /// Fill the placeholder in the partial prompt with the given value.
    /// Returns an error if the placeholder does not exist.
    pub fn try_fill(&mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Result<&mut Self, PlaceholderNotExist> {
        let placeholder = placeholder.into();
        if self.placeholder_to_vals.contains_key(&placeholder) {
            self.unfilled_placeholders.remove(&placeholder);
            self.placeholder_to_vals.insert(placeholder, Some(value.into()));
            Ok(self)
        } else {
            Err(PlaceholderNotExist::new(placeholder, value, &self.template.placeholders))
        }
    }

    /// Placeholders that still wait for a value.
    pub fn unfilled(&self) -> impl Iterator<Item=&str> {
        self.unfilled_placeholders.iter().map(String::as_str)
    }

    /// Complete the partial prompt and return the completed prompt.
    /// Returns an error if there are still unfilled placeholders.
    pub fn complete(&self) -> Result<String, UnfilledPlaceholders> {
        if self.unfilled_placeholders.is_empty() {
            Ok(replace_all_placeholders(self.template.str(), &self.placeholder_to_vals))
        } else {
            let mut all_placeholders: Vec<String> = self.template.placeholders.iter().cloned().collect();
            let mut unfilled_placeholders: Vec<String> = self.unfilled_placeholders.iter().cloned().collect();
            all_placeholders.sort();
            unfilled_placeholders.sort();
            Err(UnfilledPlaceholders {
                all_placeholders,
                unfilled_placeholders,
            })
        }
    }
}

/// A prompt template with placeholders.
#[derive(Debug, Clone)]
#[readonly::make]
pub struct PromptTemplate {
    /// The template string, immutable
    template: Arc<String>,

    /// The placeholders in the template, readonly
    #[readonly]
    pub placeholders: HashSet<String>,
}

impl PromptTemplate {
    /// Create a prompt template from a string. Warns if the template does not have any placeholder.
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let placeholders = get_placeholders(&template);
        if placeholders.is_empty() {
            warn!("Your prompt template does not have a placeholder. If this is intended, ignore this message. \
            Otherwise, check whether you have written placeholders correctly.\n\
            Got prompt template:\n\
            {}", template);
        }
        Self {
            template: Arc::new(template),
            placeholders,
        }
    }

    /// Get the prompt template as a string.
    #[inline]
    pub fn str(&self) -> &str {
        &self.template
    }

    /// Construct a partial prompt from the prompt template.
    pub fn construct_prompt(&self) -> PartialPrompt {
        PartialPrompt {
            template: self.clone(),
            placeholder_to_vals: self.placeholders.iter().map(|p| (p.clone(), None)).collect(),
            unfilled_placeholders: self.placeholders.clone(),
        }
    }

    /// Fill every placeholder from `record` and complete the prompt.
    pub fn format(&self, record: &JsonMap) -> Result<String> {
        let mut partial_prompt = self.construct_prompt();
        RecordFiller::new(record).fill(&mut partial_prompt)?;
        Ok(partial_prompt.complete()?)
    }
}

/// One role-tagged fragment of a [ChatPromptTemplate].
#[derive(Debug, Clone)]
pub enum MessageTemplate {
    /// Text with placeholders, filled from the record.
    Templated { role: Role, template: PromptTemplate },
    /// Text sent verbatim. Never scanned for placeholders.
    Literal { role: Role, content: String },
    /// Expands to the chat messages stored under `key` in the record. Absent or null means no history.
    History { key: String },
}

/// An ordered sequence of role-tagged message fragments.
#[derive(Debug, Clone, Default)]
pub struct ChatPromptTemplate {
    pub messages: Vec<MessageTemplate>,
}

impl ChatPromptTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single user message, like a plain string template.
    pub fn from_template(template: impl Into<String>) -> Self {
        Self::new().with_user(template)
    }

    pub fn with_message(mut self, role: Role, template: impl Into<String>) -> Self {
        self.messages.push(MessageTemplate::Templated { role, template: PromptTemplate::new(template) });
        self
    }

    pub fn with_system(self, template: impl Into<String>) -> Self {
        self.with_message(Role::System, template)
    }

    pub fn with_user(self, template: impl Into<String>) -> Self {
        self.with_message(Role::User, template)
    }

    pub fn with_literal(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(MessageTemplate::Literal { role, content: content.into() });
        self
    }

    pub fn with_history(mut self, key: impl Into<String>) -> Self {
        self.messages.push(MessageTemplate::History { key: key.into() });
        self
    }

    /// All placeholder names referenced by the templated fragments.
    pub fn placeholders(&self) -> HashSet<String> {
        self.messages.iter()
            .filter_map(|m| match m {
                MessageTemplate::Templated { template, .. } => Some(template.placeholders.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Fill all fragments from `record`.
    ///
    /// Fails with [UnfilledPlaceholders] if a referenced placeholder has no value in the record.
    pub fn format(&self, record: &JsonMap) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match message {
                MessageTemplate::Templated { role, template } => {
                    messages.push(ChatMessage::new(*role, template.format(record)?));
                }
                MessageTemplate::Literal { role, content } => {
                    messages.push(ChatMessage::new(*role, content.clone()));
                }
                MessageTemplate::History { key } => {
                    messages.extend(history_from_record(record, key)?);
                }
            }
        }
        Ok(messages)
    }
}

fn history_from_record(record: &JsonMap, key: &str) -> Result<Vec<ChatMessage>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::InvalidRecord {
                stage: "chat prompt".to_string(),
                detail: format!("`{}` is not a list of chat messages: {}", key, e),
            }.into()),
    }
}

pub mod errors {
    use std::collections::HashSet;
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// Error when trying to complete a partial prompt but there are still unfilled placeholders.
    #[derive(Debug)]
    pub struct UnfilledPlaceholders {
        pub unfilled_placeholders: Vec<String>,
        pub all_placeholders: Vec<String>,
    }

    impl fmt::Display for UnfilledPlaceholders {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "UnfilledPlaceholders: to complete the prompt template,\n  Requires Placeholders:{:?}\n  Unfilled Placeholders:{:?}",
                   self.all_placeholders, self.unfilled_placeholders)
        }
    }

    impl Error for UnfilledPlaceholders {}

    /// Error when trying to fill a placeholder that does not exist in the prompt template of the partial prompt.
    #[derive(Debug)]
    pub struct PlaceholderNotExist {
        pub try_fill_placeholder: String,
        pub value: String,
        pub available_placeholders: Vec<String>,
    }

    impl PlaceholderNotExist {
        pub(crate) fn new(try_fill_placeholder: impl Into<String>,
                          value: impl Into<String>,
                          available_placeholders: &HashSet<String>) -> Self {
            let available_placeholders = available_placeholders.iter().cloned().collect();
            PlaceholderNotExist {
                try_fill_placeholder: try_fill_placeholder.into(),
                value: value.into(),
                available_placeholders,
            }
        }
    }

    impl fmt::Display for PlaceholderNotExist {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "PlaceholderNotExist: try to fill placeholder = {} with value = {}, but available placeholders are {:?}",
                   self.try_fill_placeholder,
                   self.value,
                   self.available_placeholders)
        }
    }

    impl Error for PlaceholderNotExist {}
}

#[cfg(test)]
mod test_prompt {
    use serde_json::json;
    use super::{ChatPromptTemplate, PromptTemplate};
    use super::errors::{PlaceholderNotExist, UnfilledPlaceholders};
    use crate::utils::JsonMap;
    use crate::utils::llm::Role;
    use crate::utils::prompt_processing::has_placeholders;

    fn record(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_partial_prompt() {
        let template = PromptTemplate::new("{a} likes {b}");
        let mut prompt = template.construct_prompt();
        prompt.try_fill("a", "alice").unwrap();
        let err = prompt.complete().expect_err("b is unfilled");
        assert_eq!(err.unfilled_placeholders, vec!["b".to_string()]);
        prompt.try_fill("b", "bob").unwrap();
        assert_eq!(prompt.complete().unwrap(), "alice likes bob");
    }

    #[test]
    fn test_fill_nonexistent() {
        let mut prompt = PromptTemplate::new("{a}").construct_prompt();
        let err = prompt.try_fill("z", "zed").expect_err("z does not exist");
        assert_eq!(err.try_fill_placeholder, "z");
        assert_eq!(err.available_placeholders, vec!["a".to_string()]);
    }

    #[test]
    fn test_refill_updates_value() {
        let mut prompt = PromptTemplate::new("{a}").construct_prompt();
        prompt.try_fill("a", "1").unwrap().try_fill("a", "2").unwrap();
        assert_eq!(prompt.complete().unwrap(), "2");
    }

    #[test]
    fn test_chat_template_fills_every_fragment() {
        let template = ChatPromptTemplate::new()
            .with_system("{agent_prompt}")
            .with_user("Write 3 search queries for: {question}\nRespond as [\"query 1\", \"query 2\", \"query 3\"].");
        let messages = template.format(&record(json!({
            "agent_prompt": "You are a search agent.",
            "question": "binary search in Python",
            "unused": 42,
        }))).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are a search agent.");
        assert!(messages.iter().all(|m| !has_placeholders(&m.content)));
        assert!(messages[1].content.contains("[\"query 1\""));
    }

    #[test]
    fn test_chat_template_missing_value_fails() {
        let template = ChatPromptTemplate::new().with_user("{code_snippet}\n{error_message}");
        let err = template.format(&record(json!({"code_snippet": "x = 1"}))).unwrap_err();
        let unfilled = err.downcast_ref::<UnfilledPlaceholders>().expect("typed error");
        assert_eq!(unfilled.unfilled_placeholders, vec!["error_message".to_string()]);
    }

    #[test]
    fn test_null_counts_as_missing() {
        let template = ChatPromptTemplate::from_template("{a}");
        assert!(template.format(&record(json!({"a": null}))).is_err());
    }

    #[test]
    fn test_non_string_values_are_rendered_as_json() {
        let template = ChatPromptTemplate::from_template("n = {n}");
        let messages = template.format(&record(json!({"n": 3}))).unwrap();
        assert_eq!(messages[0].content, "n = 3");
    }

    #[test]
    fn test_literal_and_history() {
        let template = ChatPromptTemplate::new()
            .with_literal(Role::System, "example: {\"agent\": \"x\"} {not_a_slot}")
            .with_history("chat_history")
            .with_user("{input}");
        assert_eq!(template.placeholders().len(), 1);

        let messages = template.format(&record(json!({"input": "hi"}))).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "example: {\"agent\": \"x\"} {not_a_slot}");

        let messages = template.format(&record(json!({
            "input": "and then?",
            "chat_history": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
        }))).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Assistant);

        let err = template.format(&record(json!({"input": "x", "chat_history": "oops"})));
        assert!(err.is_err());
    }

    #[test]
    fn test_error_display() {
        let err = UnfilledPlaceholders { unfilled_placeholders: vec!["a".into()], all_placeholders: vec!["a".into()] };
        assert!(err.to_string().starts_with("UnfilledPlaceholders"));
        let err = PlaceholderNotExist::new("b", "v", &Default::default());
        assert!(err.to_string().contains("b"));
    }
}
