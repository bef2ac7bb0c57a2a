//! # pipeprompt
//!
//! Declarative prompt pipelines for LLM applications in Rust.
//!
//! A request is a query, or a record of named inputs, pushed through an ordered list of stages: fill a prompt
//! template and call a model, parse the reply, fan out over a list, transform, run branches side by side. The
//! first failing stage aborts the request, and the failure comes back as one message for the user.
//!
//! ## Concepts
//!
//! ### Prompt Template and Placeholder
//!
//! A template of prompts, for example
//!
//! ```text
//! Write 3 search queries to find relevant code snippets or documentation for the following: {question}
//! ```
//!
//! `{question}` is a placeholder named `"question"`. Names are identifiers (`[A-Za-z_][A-Za-z0-9_]*`), so JSON
//! examples such as `{"text": "..."}` in a template stay literal text.
//!
//! A [`PromptTemplate`](crate::prompt::PromptTemplate) constructs a [`PartialPrompt`](crate::prompt::PartialPrompt),
//! which records which placeholder got filled by what value. Completing a partial prompt with unfilled placeholders
//! fails, and so does filling a placeholder the template does not have.
//!
//! A [`ChatPromptTemplate`](crate::prompt::ChatPromptTemplate) is an ordered list of role-tagged fragments:
//! templated text, literal text, or a slot for a chat history taken from the record.
//!
//! ### Filler
//!
//! Anything that fills one or more placeholders in a partial prompt, see [filler]. Prompt stages fill templates
//! from the fields of the record they receive.
//!
//! ### Pipeline
//!
//! See [pipeline] for the stage kinds and [runner] for running a pipeline per request.
//!
//! ### Endpoint or LLM
//!
//! Models, search engines, web pages, embedders and retrievers are collaborators behind async traits in
//! [utils], so every pipeline can be tested with local doubles.
//!
//! ### Applications
//!
//! [exemplars] has complete pipelines: code generation, error diagnosis, code and documentation search, and
//! questions about a git repository.
//!
//! ## Configuration
//!
//! [`AppConfig`](crate::config::AppConfig) has defaults for everything; `PIPEPROMPT_*` environment variables
//! override them. The model API key is read from `GROQ_API_KEY`.
//!
//! ## Attribution
//! * `tiktoken-rs`: [crate::utils::token::tiktoken] counts tokens with its BPE tables.

pub mod prompt;
pub mod filler;
pub mod pipeline;
pub mod runner;
pub mod config;
pub mod utils;
pub mod exemplars;

#[cfg(test)]
mod test_utils;
