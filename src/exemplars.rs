//! # Applications
//!
//! Complete pipelines built from the crate's stages, each exposed as a [PipelineRunner](crate::runner::PipelineRunner):
//! * [code_generation]: code from a natural-language request
//! * [error_handling]: diagnosis of a code snippet and its error message
//! * [code_search]: web search, scraping and summarization of code snippets and documentation
//! * [repo_qa]: questions answered from the sources of a git repository

pub mod code_generation;
pub mod error_handling;
pub mod code_search;
pub mod repo_qa;
