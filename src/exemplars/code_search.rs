//! Search for code snippets and documentation.
//!
//! ```text
//! {task}
//!   -> choose an agent persona (JSON)            -> {task, agent_prompt}
//!   -> write 3 search queries (JSON list)        -> [{question}, ..]
//!   -> for each query, fail-fast:
//!        search links                            -> [{url, question}, ..]
//!        -> for each link, best-effort:
//!             scrape, summarize                  -> "Source Url: ..\nSummary: .."
//!        -> joined by "\n"
//!   -> joined by "\n\n"
//! ```

use std::sync::Arc;
use serde_json::Value;

use crate::config::AppConfig;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::transforms::{format, pick, rename, wrap_each};
use crate::pipeline::{as_record, FanOut, JoinPolicy, OutputParser, Parallel, Pipeline, Transform};
use crate::prompt::ChatPromptTemplate;
use crate::runner::PipelineRunner;
use crate::utils::llm::{Complete, Role};
use crate::utils::scrape::{scrape, Fetch};
use crate::utils::search::{search_links, Search};

pub const INPUT_KEY: &str = "task";

/// How the model is asked to answer the summary prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryFormat {
    /// Free text.
    #[default]
    Plain,
    /// A JSON object whose `text` field is the summary.
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeSearchConfig {
    pub results_per_question: usize,
    pub max_page_chars: usize,
    pub concurrency: usize,
    pub summary_format: SummaryFormat,
}

impl Default for CodeSearchConfig {
    fn default() -> Self {
        Self {
            results_per_question: 3,
            max_page_chars: 10_000,
            concurrency: 4,
            summary_format: SummaryFormat::Plain,
        }
    }
}

impl From<&AppConfig> for CodeSearchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            results_per_question: config.results_per_question,
            max_page_chars: config.max_page_chars,
            concurrency: config.concurrency,
            summary_format: SummaryFormat::default(),
        }
    }
}

pub struct CodeSearch {
    model: Arc<dyn Complete>,
    searcher: Arc<dyn Search>,
    fetcher: Arc<dyn Fetch>,
    config: CodeSearchConfig,
}

impl CodeSearch {
    const AUTO_AGENT_INSTRUCTIONS: &'static str = r#"
This task involves finding relevant code snippets and documentation for a given programming query. The search is conducted by a specific agent, determined by the programming topic.

examples:
task: "How to implement a binary search in Python?"
response:
{
    "agent": "🖥️ Code Search Agent",
    "agent_role_prompt": "You are a seasoned software development assistant AI. Your primary goal is to compose comprehensive, insightful, and methodically arranged search queries to find relevant code snippets and documentation."
}
task: "Python requests library documentation"
response:
{
    "agent": "📘 Documentation Search Agent",
    "agent_role_prompt": "You are an experienced documentation search assistant AI. Your main objective is to produce comprehensive and insightful search queries to find relevant documentation for the specified programming topic."
}
"#;

    const SEARCH_QUERIES_TEMPLATE: &'static str = "Write 3 search queries to find relevant code snippets or documentation \
for the following: {question}\nYou must respond with a list of strings in the following format: \
[\"query 1\", \"query 2\", \"query 3\"].";

    const SUMMARY_TEMPLATE: &'static str = "{text} \n\n-----------\n\n\
Using the above text, answer in short the following question: \n\n> {question}\n\n-----------\n\
If the question cannot be answered using the text, simply summarize the text. \
Include all factual information, numbers, stats etc if available.";

    const JSON_SUMMARY_SUFFIX: &'static str = "\nRespond with a JSON object of the form {\"text\": \"<your answer>\"}.";

    const SOURCE_TEMPLATE: &'static str = "Source Url: {url}\nSummary: {summary}";

    pub fn new(model: Arc<dyn Complete>, searcher: Arc<dyn Search>, fetcher: Arc<dyn Fetch>, config: CodeSearchConfig) -> Self {
        Self { model, searcher, fetcher, config }
    }

    fn choose_agent_prompt() -> ChatPromptTemplate {
        ChatPromptTemplate::new()
            .with_literal(Role::System, Self::AUTO_AGENT_INSTRUCTIONS)
            .with_user("task: {task}")
    }

    fn search_queries_prompt() -> ChatPromptTemplate {
        ChatPromptTemplate::new()
            .with_system("{agent_prompt}")
            .with_user(Self::SEARCH_QUERIES_TEMPLATE)
    }

    fn summary_prompt(&self) -> ChatPromptTemplate {
        match self.config.summary_format {
            SummaryFormat::Plain => ChatPromptTemplate::from_template(Self::SUMMARY_TEMPLATE),
            SummaryFormat::Json => ChatPromptTemplate::from_template(format!("{}{}", Self::SUMMARY_TEMPLATE, Self::JSON_SUMMARY_SUFFIX)),
        }
    }

    /// `{task}` → `{task, agent_prompt}`
    fn choose_agent(&self) -> Parallel {
        let choose = Pipeline::new()
            .prompt(Self::choose_agent_prompt(), self.model.clone())
            .parse(OutputParser::Json)
            .then(reply_field("agent_role_prompt"));
        Parallel::assign().branch("agent_prompt", choose)
    }

    /// `{url, question}` → `"Source Url: ..\nSummary: .."`
    fn scrape_and_summarize(&self) -> Pipeline {
        let mut summarize = Pipeline::new().prompt(self.summary_prompt(), self.model.clone());
        summarize = match self.config.summary_format {
            SummaryFormat::Plain => summarize.parse(OutputParser::Str),
            SummaryFormat::Json => summarize.parse(OutputParser::Json).then(reply_field("text")),
        };
        Pipeline::new()
            .then(scrape(self.fetcher.clone(), self.config.max_page_chars))
            .then(Parallel::new()
                .branch("summary", summarize)
                .branch("url", Pipeline::new().then(pick("url"))))
            .then(format(Self::SOURCE_TEMPLATE))
    }

    /// `{question}` → summaries of the links found for it, one per line.
    fn multi_search(&self) -> Pipeline {
        Pipeline::new()
            .then(search_links(self.searcher.clone(), self.config.results_per_question))
            .then(FanOut::new(self.scrape_and_summarize())
                .with_policy(JoinPolicy::BestEffort)
                .with_concurrency(self.config.concurrency)
                .concat("\n"))
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new()
            .then(self.choose_agent())
            .then(rename("task", "question"))
            .prompt(Self::search_queries_prompt(), self.model.clone())
            .parse(OutputParser::JsonList)
            .then(wrap_each("question"))
            .then(FanOut::new(self.multi_search())
                .with_policy(JoinPolicy::FailFast)
                .with_concurrency(self.config.concurrency)
                .concat("\n\n"))
    }

    pub fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(self.pipeline(), INPUT_KEY)
    }
}

/// `{key: v, ..}` → `v` for a record parsed from a model reply; a missing field is a malformed reply.
fn reply_field(key: &'static str) -> Transform {
    Transform::sync(format!("reply_field({})", key), move |value| {
        let reply = value.to_string();
        let mut record = as_record(value, "reply_field")?;
        match record.remove(key) {
            Some(field @ Value::String(_)) => Ok(field),
            _ => Err(PipelineError::malformed(format!("a JSON object with a text field `{}`", key), reply).into()),
        }
    })
}
