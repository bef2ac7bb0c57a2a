//! Reads a code snippet and its error message from stdin, separated by a line `---`, and prints a diagnosis.
//!
//! ```text
//! print(x)
//! ---
//! NameError: name 'x' is not defined
//! ```

use std::io::{stdin, Read};
use std::process::exit;
use std::sync::Arc;
use anyhow::Result;
use pipeprompt::config::AppConfig;
use pipeprompt::exemplars::error_handling::{self, record_from_text};
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

    let mut input = String::new();
    stdin().read_to_string(&mut input)?;

    match error_handling::runner(model).invoke_record(record_from_text(&input)).await {
        Ok(answer) => printer.print_answer("Analysis and Resolution", &answer)?,
        Err(failure) => printer.print_error(&failure.message)?,
    }
    Ok(())
}
