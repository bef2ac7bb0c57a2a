//! Reads a programming question from stdin, searches the web for code and documentation, and prints a summary
//! per source.

use std::io::{stdin, Read};
use std::process::exit;
use std::sync::Arc;
use anyhow::Result;
use log::info;
use pipeprompt::config::AppConfig;
use pipeprompt::exemplars::code_search::{CodeSearch, CodeSearchConfig};
use pipeprompt::utils::llm::openai::OpenAIChat;
use pipeprompt::utils::printing::MarkdownPrinter;
use pipeprompt::utils::scrape::HttpFetcher;
use pipeprompt::utils::search::DuckDuckGoSearch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let printer = MarkdownPrinter::default();
    let config = AppConfig::from_env();
    let model = match OpenAIChat::from_env(&config.api_key_var, config.conversation.clone()) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            printer.print_error(&e.to_string())?;
            exit(1);
        }
    };
    let search_config = CodeSearchConfig::from(&config);
    info!("searching {} links per query", search_config.results_per_question);
    let search = CodeSearch::new(
        model,
        Arc::new(DuckDuckGoSearch::with_defaults()?),
        Arc::new(HttpFetcher::with_defaults()?),
        search_config,
    );

    let mut query = String::new();
    stdin().read_to_string(&mut query)?;
    match search.runner().invoke(&query).await {
        Ok(results) => printer.print_answer("Search Results", &format!("```text\n{}\n```", results))?,
        Err(failure) => printer.print_error(&failure.message)?,
    }
    Ok(())
}
