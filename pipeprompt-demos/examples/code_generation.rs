//! Reads a request such as "reverse a string in Rust" from stdin and prints the generated code.

use std::io::{stdin, Read};
use std::process::exit;
use std::sync::Arc;
use anyhow::Result;
use pipeprompt::config::AppConfig;
use pipeprompt::exemplars::code_generation;
use pipeprompt::utils::llm::openai::OpenAIChat;
use pipeprompt::utils::printing::MarkdownPrinter;

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

    let mut query = String::new();
    stdin().read_to_string(&mut query)?;
    match code_generation::runner(model).invoke(&query).await {
        Ok(answer) => printer.print_answer("Response from the LLM", &answer)?,
        Err(failure) => printer.print_error(&failure.message)?,
    }
    Ok(())
}
