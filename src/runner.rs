//! # Runner
//! The top of a request: validates the user input, runs a [Pipeline] and turns the outcome into text or a
//! [RunFailure] fit to show to the user.

use std::fmt;
use std::fmt::Formatter;
use log::{info, warn};
use serde_json::Value;

use crate::pipeline::errors::{ErrorKind, PipelineError};
use crate::pipeline::Pipeline;
use crate::prompt::errors::{PlaceholderNotExist, UnfilledPlaceholders};
use crate::utils::JsonMap;
use crate::utils::postprocess::json::InvalidJSON;

pub const DEFAULT_EMPTY_INPUT_MESSAGE: &str = "Please enter a query.";

/// A failed request: what kind of failure and a message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunFailure {
    fn missing_input(message: &str) -> Self {
        Self {
            kind: ErrorKind::MissingInput,
            message: message.to_string(),
        }
    }

    /// Classifies by the first typed error found in the chain of `error`. Untyped errors count as upstream
    /// failures, since every collaborator call is remote.
    pub fn from_error(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(e) = cause.downcast_ref::<PipelineError>() {
                return Self { kind: e.kind(), message: e.to_string() };
            }
            if cause.is::<UnfilledPlaceholders>() || cause.is::<PlaceholderNotExist>() {
                return Self { kind: ErrorKind::InvalidPipeline, message: cause.to_string() };
            }
            if cause.is::<InvalidJSON>() {
                return Self { kind: ErrorKind::MalformedOutput, message: cause.to_string() };
            }
        }
        Self {
            kind: ErrorKind::Upstream,
            message: format!("{:#}", error),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RunFailure {}

/// Runs one pipeline per request. Holds no state between requests.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    pub pipeline: Pipeline,
    /// Record field the query of [PipelineRunner::invoke] is stored under.
    pub input_key: String,
    /// Fields [PipelineRunner::invoke_record] requires to be non-empty text.
    pub required_inputs: Vec<String>,
    pub empty_input_message: String,
}

impl PipelineRunner {
    pub fn new(pipeline: Pipeline, input_key: impl Into<String>) -> Self {
        let input_key = input_key.into();
        Self {
            pipeline,
            required_inputs: vec![input_key.clone()],
            input_key,
            empty_input_message: DEFAULT_EMPTY_INPUT_MESSAGE.to_string(),
        }
    }

    pub fn with_required_inputs(mut self, required_inputs: &[&str]) -> Self {
        self.required_inputs = required_inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_empty_input_message(mut self, message: impl Into<String>) -> Self {
        self.empty_input_message = message.into();
        self
    }

    /// Runs the pipeline on `{input_key: query}`. A blank query fails without running anything.
    pub async fn invoke(&self, query: &str) -> Result<String, RunFailure> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RunFailure::missing_input(&self.empty_input_message));
        }
        let mut record = JsonMap::new();
        record.insert(self.input_key.clone(), Value::String(query.to_string()));
        self.run(record).await
    }

    /// Runs the pipeline on a record of several inputs, all of `required_inputs` being non-blank text.
    pub async fn invoke_record(&self, record: JsonMap) -> Result<String, RunFailure> {
        let mut record = record;
        for key in &self.required_inputs {
            match record.get(key) {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    let trimmed = text.trim().to_string();
                    record.insert(key.clone(), Value::String(trimmed));
                }
                _ => return Err(RunFailure::missing_input(&self.empty_input_message)),
            }
        }
        self.run(record).await
    }

    async fn run(&self, record: JsonMap) -> Result<String, RunFailure> {
        info!("running a pipeline of {} stages", self.pipeline.stages().len());
        match self.pipeline.run(Value::Object(record)).await {
            Ok(output) => Ok(render_output(output)),
            Err(e) => {
                warn!("pipeline failed: {:#}", e);
                Err(RunFailure::from_error(&e))
            }
        }
    }
}

/// Text as it is, anything else as pretty JSON.
pub fn render_output(output: Value) -> String {
    match output {
        Value::String(text) => text,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}
