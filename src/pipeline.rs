//! # Pipeline
//! A pipeline is an ordered list of [Stage]s. Every stage consumes the output of the previous one, a JSON
//! [Value] (an object is called a *record*), and produces the next.
//!
//! Stage kinds:
//! * [Stage::Prompt]: fill a [ChatPromptTemplate] from the input record and invoke a model.
//! * [Stage::Parse]: parse the model reply into text, a JSON object or a JSON list.
//! * [Stage::FanOut]: run an inner pipeline over every element of a list, with bounded concurrency, then join.
//! * [Stage::Transform]: any named function of the value, see [transforms] for the built-in ones.
//! * [Stage::Parallel]: run several named branches on the same input and collect their outputs in a record.
//!
//! The first failing stage aborts the pipeline. Nothing is retried or cached.

use std::fmt;
use std::fmt::Formatter;
use std::future::Future;
use std::sync::Arc;
use anyhow::{Context, Result};
use futures::future::{BoxFuture, try_join_all};
use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use log::{debug, warn};
use serde_json::Value;

use crate::filler::render_value;
use crate::pipeline::errors::PipelineError;
use crate::prompt::ChatPromptTemplate;
use crate::utils::JsonMap;
use crate::utils::llm::Complete;
use crate::utils::postprocess::json::{filter_to_json, filter_to_json_list};

/// Default bound of in-flight elements of a [FanOut].
pub const DEFAULT_CONCURRENCY: usize = 4;

type TransformFn = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A named function from one value to the next.
#[derive(Clone)]
pub struct Transform {
    name: String,
    func: Arc<TransformFn>,
}

impl Transform {
    /// An asynchronous transform, typically one that calls an external service.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
        where F: Fn(Value) -> Fut + Send + Sync + 'static,
              Fut: Future<Output=Result<Value>> + Send + 'static {
        Self {
            name: name.into(),
            func: Arc::new(move |value| func(value).boxed()),
        }
    }

    /// A pure transform.
    pub fn sync<F>(name: impl Into<String>, func: F) -> Self
        where F: Fn(Value) -> Result<Value> + Send + Sync + 'static {
        let func = Arc::new(func);
        Self::new(name, move |value| {
            let func = func.clone();
            async move { func(value) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn apply(&self, value: Value) -> Result<Value> {
        (self.func)(value).await
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

/// Fill a chat prompt template and invoke a model. Outputs the reply as a string.
#[derive(Clone)]
pub struct PromptStage {
    pub template: ChatPromptTemplate,
    model: Arc<dyn Complete>,
}

impl PromptStage {
    pub fn new(template: ChatPromptTemplate, model: Arc<dyn Complete>) -> Self {
        Self { template, model }
    }

    async fn run(&self, input: Value) -> Result<Value> {
        let record = as_record(input, "prompt")?;
        let messages = self.template.format(&record)?;
        let reply = self.model.complete(&messages).await?;
        Ok(Value::String(reply))
    }
}

impl fmt::Debug for PromptStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStage").field("template", &self.template).finish_non_exhaustive()
    }
}

/// How the output of a model is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputParser {
    /// The reply as it is. Fails if the value is not a string.
    Str,
    /// The outermost `{...}` of the reply as a JSON object.
    Json,
    /// The outermost `[...]` of the reply as a JSON list.
    JsonList,
}

impl OutputParser {
    fn parse(&self, input: Value) -> Result<Value> {
        match (self, input) {
            (OutputParser::Str, value @ Value::String(_)) => Ok(value),
            (OutputParser::Json, value @ Value::Object(_)) => Ok(value),
            (OutputParser::JsonList, value @ Value::Array(_)) => Ok(value),
            (OutputParser::Json, Value::String(reply)) => match filter_to_json(reply.as_str()) {
                Ok(value @ Value::Object(_)) => Ok(value),
                _ => Err(PipelineError::malformed("a JSON object", reply).into()),
            },
            (OutputParser::JsonList, Value::String(reply)) => filter_to_json_list(reply.as_str())
                .map_err(|_| PipelineError::malformed("a JSON list", reply).into()),
            (parser, other) => Err(PipelineError::malformed(parser.expected(), other.to_string()).into()),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            OutputParser::Str => "a text reply",
            OutputParser::Json => "a JSON object",
            OutputParser::JsonList => "a JSON list",
        }
    }
}

/// What happens to a fan-out when one of its elements fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// The first failure fails the whole join.
    #[default]
    FailFast,
    /// Failed elements are logged and left out of the join.
    BestEffort,
}

/// How the outputs of a fan-out are combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    /// A list of the outputs, in input order.
    Collect,
    /// The outputs rendered as text and concatenated with the separator.
    Concat(String),
}

impl Join {
    fn apply(&self, outputs: Vec<Value>) -> Value {
        match self {
            Join::Collect => Value::Array(outputs),
            Join::Concat(separator) => Value::String(
                outputs.iter().map(render_value).collect::<Vec<_>>().join(separator)
            ),
        }
    }
}

/// Scatter-gather of an inner pipeline over a list.
#[derive(Clone, Debug)]
pub struct FanOut {
    pub inner: Pipeline,
    pub join: Join,
    pub policy: JoinPolicy,
    pub concurrency: usize,
}

impl FanOut {
    pub fn new(inner: Pipeline) -> Self {
        Self {
            inner,
            join: Join::Collect,
            policy: JoinPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn concat(mut self, separator: impl Into<String>) -> Self {
        self.join = Join::Concat(separator.into());
        self
    }

    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn run(&self, input: Value) -> Result<Value> {
        let items = match input {
            Value::Array(items) => items,
            other => return Err(PipelineError::InvalidRecord {
                stage: "fan-out".to_string(),
                detail: format!("expected a list, got {}", other),
            }.into()),
        };
        let total = items.len();
        debug!("fan-out over {} elements, at most {} in flight", total, self.concurrency);
        let results = stream::iter(items.into_iter().map(|item| self.inner.run(item)))
            .buffered(self.concurrency.max(1));
        let outputs: Vec<Value> = match self.policy {
            JoinPolicy::FailFast => results.try_collect().await?,
            JoinPolicy::BestEffort => {
                let outputs: Vec<Value> = results
                    .filter_map(|result| async move {
                        match result {
                            Ok(value) => Some(value),
                            Err(e) => {
                                warn!("fan-out element dropped: {:#}", e);
                                None
                            }
                        }
                    })
                    .collect()
                    .await;
                if outputs.len() < total {
                    warn!("fan-out kept {} of {} elements", outputs.len(), total);
                }
                outputs
            }
        };
        Ok(self.join.apply(outputs))
    }
}

/// Named branches run concurrently on the same input.
#[derive(Clone, Debug, Default)]
pub struct Parallel {
    pub branches: Vec<(String, Pipeline)>,
    /// Merge the branch outputs into the input record instead of starting a new record.
    pub keep_input: bool,
}

impl Parallel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the input record and add the branch outputs to it.
    pub fn assign() -> Self {
        Self { branches: Vec::new(), keep_input: true }
    }

    pub fn branch(mut self, key: impl Into<String>, pipeline: Pipeline) -> Self {
        self.branches.push((key.into(), pipeline));
        self
    }

    async fn run(&self, input: Value) -> Result<Value> {
        let outputs = try_join_all(self.branches.iter()
            .map(|(key, pipeline)| {
                let input = input.clone();
                async move {
                    pipeline.run(input).await
                        .with_context(|| format!("branch `{}` failed", key))
                }
            })).await?;
        let mut record = if self.keep_input {
            as_record(input, "parallel")?
        } else {
            JsonMap::new()
        };
        for ((key, _), output) in self.branches.iter().zip(outputs) {
            record.insert(key.clone(), output);
        }
        Ok(Value::Object(record))
    }
}

/// One step of a [Pipeline].
#[derive(Clone, Debug)]
pub enum Stage {
    Prompt(PromptStage),
    Parse(OutputParser),
    FanOut(FanOut),
    Transform(Transform),
    Parallel(Parallel),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Prompt(_) => "prompt",
            Stage::Parse(_) => "parse",
            Stage::FanOut(_) => "fan-out",
            Stage::Transform(transform) => transform.name(),
            Stage::Parallel(_) => "parallel",
        }
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        match self {
            Stage::Prompt(stage) => stage.run(input).boxed(),
            Stage::Parse(parser) => futures::future::ready(parser.parse(input)).boxed(),
            Stage::FanOut(fan_out) => fan_out.run(input).boxed(),
            Stage::Transform(transform) => transform.apply(input).boxed(),
            Stage::Parallel(parallel) => parallel.run(input).boxed(),
        }
    }
}

impl From<PromptStage> for Stage {
    fn from(stage: PromptStage) -> Self {
        Stage::Prompt(stage)
    }
}

impl From<OutputParser> for Stage {
    fn from(parser: OutputParser) -> Self {
        Stage::Parse(parser)
    }
}

impl From<FanOut> for Stage {
    fn from(fan_out: FanOut) -> Self {
        Stage::FanOut(fan_out)
    }
}

impl From<Transform> for Stage {
    fn from(transform: Transform) -> Self {
        Stage::Transform(transform)
    }
}

impl From<Parallel> for Stage {
    fn from(parallel: Parallel) -> Self {
        Stage::Parallel(parallel)
    }
}

/// An ordered list of stages. An empty pipeline passes its input through.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl Into<Stage>) -> Self {
        self.stages.push(stage.into());
        self
    }

    /// Shorthand for a [PromptStage].
    pub fn prompt(self, template: ChatPromptTemplate, model: Arc<dyn Complete>) -> Self {
        self.then(PromptStage::new(template, model))
    }

    pub fn parse(self, parser: OutputParser) -> Self {
        self.then(parser)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        async move {
            let mut value = input;
            for (idx, stage) in self.stages.iter().enumerate() {
                debug!("running stage #{} ({})", idx, stage.name());
                value = stage.run(value).await
                    .with_context(|| format!("stage #{} ({}) failed", idx, stage.name()))?;
            }
            Ok(value)
        }.boxed()
    }
}

/// Expect a record, failing with [PipelineError::InvalidRecord] otherwise.
pub fn as_record(value: Value, stage: &str) -> Result<JsonMap, PipelineError> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(PipelineError::InvalidRecord {
            stage: stage.to_string(),
            detail: format!("expected a record, got {}", other),
        }),
    }
}

pub mod transforms {
    //! Built-in static transforms.

    use anyhow::Result;
    use serde_json::{json, Value};

    use super::{as_record, Transform};
    use crate::filler::render_value;
    use crate::pipeline::errors::PipelineError;
    use crate::prompt::PromptTemplate;
    use crate::utils::token::{truncate_to_tokens, CountToken};

    /// `{key: v, ..}` → `v`
    pub fn pick(key: impl Into<String>) -> Transform {
        let key = key.into();
        Transform::sync(format!("pick({})", key), move |value| {
            let mut record = as_record(value, "pick")?;
            Ok(record.remove(&key).ok_or_else(|| missing_field("pick", &key))?)
        })
    }

    /// `v` → `{key: v}`
    pub fn wrap(key: impl Into<String>) -> Transform {
        let key = key.into();
        Transform::sync(format!("wrap({})", key), move |value| Ok(json!({ key.as_str(): value })))
    }

    /// `[a, b]` → `[{key: a}, {key: b}]`
    pub fn wrap_each(key: impl Into<String>) -> Transform {
        let key = key.into();
        Transform::sync(format!("wrap_each({})", key), move |value| {
            let items = expect_list(value, "wrap_each")?;
            Ok(Value::Array(items.into_iter().map(|item| json!({ key.as_str(): item })).collect()))
        })
    }

    /// Adds a constant field to a record.
    pub fn insert(key: impl Into<String>, field: Value) -> Transform {
        let key = key.into();
        Transform::sync(format!("insert({})", key), move |value| {
            let mut record = as_record(value, "insert")?;
            record.insert(key.clone(), field.clone());
            Ok(Value::Object(record))
        })
    }

    /// Renames a field of a record.
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Transform {
        let (from, to) = (from.into(), to.into());
        Transform::sync(format!("rename({} -> {})", from, to), move |value| {
            let mut record = as_record(value, "rename")?;
            let field = record.remove(&from).ok_or_else(|| missing_field("rename", &from))?;
            record.insert(to.clone(), field);
            Ok(Value::Object(record))
        })
    }

    /// A list rendered as text and joined with `separator`.
    pub fn join(separator: impl Into<String>) -> Transform {
        let separator = separator.into();
        Transform::sync("join", move |value| {
            let items = expect_list(value, "join")?;
            Ok(Value::String(items.iter().map(render_value).collect::<Vec<_>>().join(&separator)))
        })
    }

    /// Text split on `separator`. The empty string gives the empty list, so `split` inverts [join] for lists of non-empty strings.
    pub fn split(separator: impl Into<String>) -> Transform {
        let separator = separator.into();
        Transform::sync("split", move |value| {
            let text = match value {
                Value::String(text) => text,
                other => return Err(PipelineError::InvalidRecord {
                    stage: "split".to_string(),
                    detail: format!("expected text, got {}", other),
                }.into()),
            };
            if text.is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            Ok(Value::Array(text.split(separator.as_str()).map(|s| Value::String(s.to_string())).collect()))
        })
    }

    /// A record rendered through a prompt template, e.g. `"Source Url: {url}\nSummary: {summary}"`.
    pub fn format(template: impl Into<String>) -> Transform {
        let template = PromptTemplate::new(template);
        Transform::sync("format", move |value| {
            let record = as_record(value, "format")?;
            Ok(Value::String(template.format(&record)?))
        })
    }

    /// Cuts a text field of a record down to `budget` tokens as measured by `counter`.
    pub fn truncate_field<C>(key: impl Into<String>, budget: usize, counter: C) -> Transform
        where C: CountToken + Send + Sync + 'static {
        let key = key.into();
        Transform::sync(format!("truncate({})", key), move |value| {
            let mut record = as_record(value, "truncate")?;
            let text = match record.get(&key) {
                Some(Value::String(text)) => text,
                _ => return Err(missing_field("truncate", &key).into()),
            };
            let truncated = truncate_to_tokens(text, budget, &counter).to_string();
            record.insert(key.clone(), Value::String(truncated));
            Ok(Value::Object(record))
        })
    }

    fn expect_list(value: Value, stage: &str) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items),
            other => Err(PipelineError::InvalidRecord {
                stage: stage.to_string(),
                detail: format!("expected a list, got {}", other),
            }.into()),
        }
    }

    fn missing_field(stage: &str, key: &str) -> PipelineError {
        PipelineError::InvalidRecord {
            stage: stage.to_string(),
            detail: format!("missing field `{}`", key),
        }
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// The categories of failure a request can end in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ErrorKind {
        MissingInput,
        Upstream,
        MalformedOutput,
        MissingCredential,
        /// A template or stage received a record it cannot work with.
        InvalidPipeline,
    }

    /// Errors raised by pipeline stages and their collaborators.
    #[derive(Debug, Clone, PartialEq)]
    pub enum PipelineError {
        MissingInput { message: String },
        Upstream { service: String, detail: String },
        MalformedOutput { expected: String, output: String },
        MissingCredential { variable: String },
        InvalidRecord { stage: String, detail: String },
    }

    impl PipelineError {
        pub fn upstream(service: impl Into<String>, error: impl fmt::Display) -> Self {
            PipelineError::Upstream { service: service.into(), detail: error.to_string() }
        }

        pub fn malformed(expected: impl Into<String>, output: impl Into<String>) -> Self {
            PipelineError::MalformedOutput { expected: expected.into(), output: output.into() }
        }

        pub fn kind(&self) -> ErrorKind {
            match self {
                PipelineError::MissingInput { .. } => ErrorKind::MissingInput,
                PipelineError::Upstream { .. } => ErrorKind::Upstream,
                PipelineError::MalformedOutput { .. } => ErrorKind::MalformedOutput,
                PipelineError::MissingCredential { .. } => ErrorKind::MissingCredential,
                PipelineError::InvalidRecord { .. } => ErrorKind::InvalidPipeline,
            }
        }
    }

    impl fmt::Display for PipelineError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                PipelineError::MissingInput { message } => write!(f, "{}", message),
                PipelineError::Upstream { service, detail } => write!(f, "{} failed: {}", service, detail),
                PipelineError::MalformedOutput { expected, output } => {
                    write!(f, "expected {} from the model, got:\n{}", expected, output)
                }
                PipelineError::MissingCredential { variable } => {
                    write!(f, "environment variable {} is not set; add it to your environment or .env file", variable)
                }
                PipelineError::InvalidRecord { stage, detail } => write!(f, "{} stage: {}", stage, detail),
            }
        }
    }

    impl Error for PipelineError {}
}
