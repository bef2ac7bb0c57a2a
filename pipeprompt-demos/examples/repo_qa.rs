//! Indexes the sources of a git repository, then answers the questions read from stdin, one per line, keeping
//! the conversation as chat history.

use std::io::stdin;
use std::process::exit;
use std::sync::Arc;
use anyhow::Result;
use log::info;
use pipeprompt::config::AppConfig;
use pipeprompt::exemplars::repo_qa::{index_repository, question_with_history, RepoQa, RepoQaConfig};
use pipeprompt::utils::embedding::HashingEmbedding;
use pipeprompt::utils::llm::ChatMessage;
use pipeprompt::utils::llm::openai::OpenAIChat;
use pipeprompt::utils::printing::MarkdownPrinter;
use pipeprompt::utils::retrievers::VectorStoreRetriever;
use pipeprompt::utils::token::tiktoken::Tiktoken;
use pipeprompt::utils::vec_stores::InMemoryVectorStore;

/// Tokens of chat history sent along with a question.
const HISTORY_TOKEN_BUDGET: usize = 2000;

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

    let qa_config = RepoQaConfig { k: config.retrieval_k, ..RepoQaConfig::default() };
    let embedder = Arc::new(HashingEmbedding::default());
    let store = Arc::new(InMemoryVectorStore::new());
    let chunks = index_repository(&qa_config, embedder.as_ref(), store.as_ref()).await?;
    info!("indexed {} chunks of {}", chunks, qa_config.repo_url);

    let retriever = Arc::new(VectorStoreRetriever::new(embedder, store));
    let runner = RepoQa::new(model, retriever, qa_config.k).runner();
    let tiktoken = Tiktoken::new(config.conversation.model.as_str())?;
    let mut history: Vec<ChatMessage> = Vec::new();
    for line in stdin().lines() {
        let question = line?;
        if question.trim().is_empty() {
            continue;
        }
        match runner.invoke_record(question_with_history(&question, &history)?).await {
            Ok(answer) => {
                printer.print_answer(&format!("Question: {}", question.trim()), &answer)?;
                history.push(ChatMessage::user(question.trim()));
                history.push(ChatMessage::assistant(answer));
                history = tiktoken.truncate_messages(&history, HISTORY_TOKEN_BUDGET);
            }
            Err(failure) => printer.print_error(&failure.message)?,
        }
    }
    Ok(())
}
