//! Questions answered from the sources of a git repository.
//!
//! Indexing runs once: clone, load, split, embed, store. Every question then goes through a history-aware
//! retriever, which rewrites the question into a search query when there is a conversation to take into
//! account, and a prompt answering from the retrieved chunks.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Result;
use log::{debug, info};
use serde_json::Value;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::{as_record, OutputParser, Pipeline, Transform};
use crate::prompt::ChatPromptTemplate;
use crate::runner::PipelineRunner;
use crate::utils::JsonMap;
use crate::utils::embedding::Embed;
use crate::utils::llm::{ChatMessage, Complete, Role};
use crate::utils::loader::{clone_repository, SourceLoader};
use crate::utils::retrievers::{format_documents, Document, Retrieve};
use crate::utils::splitter::{Language, RecursiveTextSplitter};
use crate::utils::vec_stores::VectorStore;

pub const INPUT_KEY: &str = "input";
pub const HISTORY_KEY: &str = "chat_history";

const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct RepoQaConfig {
    pub repo_url: String,
    pub checkout_dir: PathBuf,
    /// Directory of the checkout that gets indexed.
    pub source_subdir: String,
    pub suffixes: Vec<String>,
    pub exclude: Vec<String>,
    pub language: Language,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Chunks retrieved per question.
    pub k: usize,
}

impl Default for RepoQaConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/langchain-ai/langchain".to_string(),
            checkout_dir: PathBuf::from("test_repo"),
            source_subdir: "libs/core/langchain_core".to_string(),
            suffixes: vec![".py".to_string()],
            exclude: vec!["**/non-utf8-encoding.py".to_string()],
            language: Language::Python,
            chunk_size: 2000,
            chunk_overlap: 200,
            k: 8,
        }
    }
}

impl RepoQaConfig {
    pub fn splitter(&self) -> Result<RecursiveTextSplitter> {
        RecursiveTextSplitter::from_language(self.language, self.chunk_size, self.chunk_overlap)
    }

    pub fn loader(&self) -> Result<SourceLoader> {
        let suffixes: Vec<&str> = self.suffixes.iter().map(String::as_str).collect();
        let exclude: Vec<&str> = self.exclude.iter().map(String::as_str).collect();
        SourceLoader::new(self.checkout_dir.join(&self.source_subdir))
            .with_suffixes(&suffixes)
            .with_exclude(&exclude)
    }
}

/// Clones the repository and indexes its sources. Returns the number of stored chunks.
pub async fn index_repository(config: &RepoQaConfig, embedder: &dyn Embed, store: &dyn VectorStore) -> Result<usize> {
    clone_repository(&config.repo_url, &config.checkout_dir).await?;
    let documents = config.loader()?.load()?;
    index_documents(&documents, &config.splitter()?, embedder, store).await
}

/// Splits, embeds and stores `documents`. Returns the number of stored chunks.
pub async fn index_documents(documents: &[Document],
                             splitter: &RecursiveTextSplitter,
                             embedder: &dyn Embed,
                             store: &dyn VectorStore) -> Result<usize> {
    let chunks = splitter.split_documents(documents);
    info!("{} documents split into {} chunks", documents.len(), chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        store.add(vectors.into_iter().zip(batch.iter().cloned()).collect()).await?;
        debug!("stored {} chunks", batch.len());
    }
    Ok(chunks.len())
}

pub struct RepoQa {
    model: Arc<dyn Complete>,
    retriever: Arc<dyn Retrieve>,
    k: usize,
}

impl RepoQa {
    const REPHRASE_INSTRUCTION: &'static str = "Given the above conversation, generate a search query to look up \
to get information relevant to the conversation";

    const ANSWER_SYSTEM_TEMPLATE: &'static str = "Answer the user's questions based on the below context:\n\n{context}";

    pub fn new(model: Arc<dyn Complete>, retriever: Arc<dyn Retrieve>, k: usize) -> Self {
        Self { model, retriever, k }
    }

    fn rephrase_prompt() -> ChatPromptTemplate {
        ChatPromptTemplate::new()
            .with_history(HISTORY_KEY)
            .with_user(format!("{{{}}}", INPUT_KEY))
            .with_literal(Role::User, Self::REPHRASE_INSTRUCTION)
    }

    fn answer_prompt() -> ChatPromptTemplate {
        ChatPromptTemplate::new()
            .with_system(Self::ANSWER_SYSTEM_TEMPLATE)
            .with_history(HISTORY_KEY)
            .with_user(format!("{{{}}}", INPUT_KEY))
    }

    /// `{input, chat_history?}` → `{input, chat_history?, context}`. The question is rewritten into a search
    /// query by the model only when the history is not empty.
    fn history_aware_retrieval(&self) -> Transform {
        let model = self.model.clone();
        let retriever = self.retriever.clone();
        let k = self.k;
        let rephrase = Self::rephrase_prompt();
        Transform::new("history_aware_retrieval", move |value| {
            let model = model.clone();
            let retriever = retriever.clone();
            let rephrase = rephrase.clone();
            async move {
                let mut record = as_record(value, "history_aware_retrieval")?;
                let has_history = matches!(record.get(HISTORY_KEY), Some(Value::Array(history)) if !history.is_empty());
                let query = if has_history {
                    let messages = rephrase.format(&record)?;
                    let query = model.complete(&messages).await?;
                    debug!("search query rewritten to {:?}", query);
                    query
                } else {
                    match record.get(INPUT_KEY) {
                        Some(Value::String(input)) => input.clone(),
                        _ => return Err(PipelineError::InvalidRecord {
                            stage: "history_aware_retrieval".to_string(),
                            detail: format!("missing text field `{}`", INPUT_KEY),
                        }.into()),
                    }
                };
                let documents = retriever.retrieve(&query, k).await?;
                record.insert("context".to_string(), Value::String(format_documents(&documents)));
                Ok(Value::Object(record))
            }
        })
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new()
            .then(self.history_aware_retrieval())
            .prompt(Self::answer_prompt(), self.model.clone())
            .parse(OutputParser::Str)
    }

    pub fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(self.pipeline(), INPUT_KEY)
    }
}

/// The record of a follow-up question: the question and the conversation so far.
pub fn question_with_history(question: &str, history: &[ChatMessage]) -> Result<JsonMap> {
    let mut record = JsonMap::new();
    record.insert(INPUT_KEY.to_string(), Value::String(question.to_string()));
    record.insert(HISTORY_KEY.to_string(), serde_json::to_value(history)?);
    Ok(record)
}

#[cfg(test)]
mod test_repo_qa {
    use std::sync::Arc;
    use crate::pipeline::errors::ErrorKind;
    use crate::test_utils::ScriptedModel;
    use crate::utils::embedding::HashingEmbedding;
    use crate::utils::llm::{ChatMessage, Role};
    use crate::utils::retrievers::{Document, SearchType, VectorStoreRetriever};
    use crate::utils::splitter::{Language, RecursiveTextSplitter};
    use crate::utils::vec_stores::InMemoryVectorStore;
    use super::{index_documents, question_with_history, RepoQa, RepoQaConfig};

    const SOURCES: [(&str, &str); 3] = [
        ("runnables/base.py", "class RunnableBinding(RunnableSerializable):\n    \"\"\"Wrap a Runnable with additional functionality.\"\"\"\n"),
        ("runnables/config.py", "def ensure_config(config):\n    return config or {}\n"),
        ("output_parsers/json.py", "class JsonOutputParser(BaseCumulativeTransformOutputParser):\n    pass\n"),
    ];

    async fn indexed_retriever() -> Arc<VectorStoreRetriever> {
        let embedder = Arc::new(HashingEmbedding::default());
        let store = Arc::new(InMemoryVectorStore::new());
        let documents: Vec<Document> = SOURCES.iter()
            .map(|(path, code)| Document::new(*code).with_source(*path))
            .collect();
        let splitter = RecursiveTextSplitter::from_language(Language::Python, 2000, 200).unwrap();
        let stored = index_documents(&documents, &splitter, embedder.as_ref(), store.as_ref()).await.unwrap();
        assert_eq!(stored, 3);
        assert_eq!(store.len(), 3);
        Arc::new(VectorStoreRetriever::new(embedder, store).with_search_type(SearchType::Similarity))
    }

    #[tokio::test]
    async fn test_answer_from_context() {
        let model = Arc::new(ScriptedModel::new(vec!["A RunnableBinding wraps a Runnable."]));
        let qa = RepoQa::new(model.clone(), indexed_retriever().await, 1);
        let answer = qa.runner().invoke("What is a RunnableBinding?").await.unwrap();
        assert_eq!(answer, "A RunnableBinding wraps a Runnable.");
        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        let messages = &prompts[0];
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("class RunnableBinding"));
        assert!(!messages[0].content.contains("ensure_config"));
        assert_eq!(messages[1].content, "What is a RunnableBinding?");
    }

    #[tokio::test]
    async fn test_history_rewrites_query() {
        let model = Arc::new(ScriptedModel::new(vec!["JsonOutputParser class", "It parses JSON output."]));
        let qa = RepoQa::new(model.clone(), indexed_retriever().await, 1);
        let history = vec![
            ChatMessage::user("What is a RunnableBinding?"),
            ChatMessage::assistant("A RunnableBinding wraps a Runnable."),
        ];
        let record = question_with_history("And the json parser?", &history).unwrap();
        let answer = qa.runner().invoke_record(record).await.unwrap();
        assert_eq!(answer, "It parses JSON output.");

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        let rephrase = &prompts[0];
        assert_eq!(rephrase.len(), 4);
        assert_eq!(rephrase[2].content, "And the json parser?");
        assert!(rephrase[3].content.starts_with("Given the above conversation"));
        let answer_prompt = &prompts[1];
        assert!(answer_prompt[0].content.contains("class JsonOutputParser"));
        assert_eq!(answer_prompt.len(), 4);
    }

    #[tokio::test]
    async fn test_blank_question() {
        let model = Arc::new(ScriptedModel::echo());
        let qa = RepoQa::new(model.clone(), indexed_retriever().await, 1);
        assert_eq!(qa.runner().invoke(" ").await.unwrap_err().kind, ErrorKind::MissingInput);
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_default_config() {
        let config = RepoQaConfig::default();
        assert_eq!((config.chunk_size, config.chunk_overlap, config.k), (2000, 200, 8));
        assert!(config.loader().unwrap().root.ends_with("libs/core/langchain_core"));
    }
}
