//! Retrieval: `retrieve(query, k) -> [document]`.

use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::{as_record, Transform};
use crate::utils::embedding::Embed;
use crate::utils::vec_stores::{maximal_marginal_relevance, VectorStore};

/// A piece of retrieved text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    /// File path, url or any other origin of the content.
    pub source: Option<String>,
    /// Similarity to the query, if the document comes from a search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
            score: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>>;
}

#[async_trait]
impl<T: Retrieve + ?Sized> Retrieve for Arc<T> {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        (**self).retrieve(query, k).await
    }
}

/// How a [VectorStoreRetriever] picks documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchType {
    /// The `k` nearest documents.
    Similarity,
    /// `k` documents picked by maximal marginal relevance among the `fetch_k` nearest.
    Mmr { fetch_k: usize, lambda: f32 },
}

impl Default for SearchType {
    fn default() -> Self {
        SearchType::Mmr { fetch_k: 20, lambda: 0.5 }
    }
}

/// Embeds the query and searches a vector store.
#[derive(Clone)]
pub struct VectorStoreRetriever {
    pub embedder: Arc<dyn Embed>,
    pub store: Arc<dyn VectorStore>,
    pub search_type: SearchType,
}

impl VectorStoreRetriever {
    pub fn new(embedder: Arc<dyn Embed>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            search_type: SearchType::default(),
        }
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }
}

#[async_trait]
impl Retrieve for VectorStoreRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let query_vec = self.embedder.embed(query).await?;
        let documents: Vec<Document> = match self.search_type {
            SearchType::Similarity => self.store.search(&query_vec, k).await?
                .into_iter()
                .map(|hit| Document { score: Some(hit.score), ..hit.document })
                .collect(),
            SearchType::Mmr { fetch_k, lambda } => {
                let mut candidates = self.store.search(&query_vec, fetch_k.max(k)).await?;
                let vectors: Vec<_> = candidates.iter().map(|hit| hit.vector.clone()).collect();
                let picked = maximal_marginal_relevance(&query_vec, &vectors, k, lambda);
                let mut slots: Vec<_> = candidates.drain(..).map(Some).collect();
                picked.into_iter()
                    .filter_map(|idx| slots[idx].take())
                    .map(|hit| Document { score: Some(hit.score), ..hit.document })
                    .collect()
            }
        };
        debug!("retrieved {} documents for {:?}", documents.len(), query);
        Ok(documents)
    }
}

/// Documents stuffed into one context string, separated by blank lines.
pub fn format_documents(documents: &[Document]) -> String {
    documents.iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Stage: `{query_key: q, ..}` → `{query_key: q, context: <k documents>, ..}`.
pub fn retrieve_context(retriever: Arc<dyn Retrieve>, k: usize, query_key: impl Into<String>) -> Transform {
    let query_key = query_key.into();
    Transform::new("retrieve_context", move |value| {
        let retriever = retriever.clone();
        let query_key = query_key.clone();
        async move {
            let mut record = as_record(value, "retrieve_context")?;
            let query = match record.get(&query_key) {
                Some(Value::String(query)) => query.clone(),
                _ => return Err(PipelineError::InvalidRecord {
                    stage: "retrieve_context".to_string(),
                    detail: format!("missing text field `{}`", query_key),
                }.into()),
            };
            let documents = retriever.retrieve(&query, k).await?;
            record.insert("context".to_string(), Value::String(format_documents(&documents)));
            Ok(Value::Object(record))
        }
    })
}

#[cfg(test)]
mod test_retrievers {
    use std::collections::HashMap;
    use std::sync::Arc;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use super::{retrieve_context, Document, Retrieve, SearchType, VectorStoreRetriever};
    use crate::pipeline::Pipeline;
    use crate::utils::embedding::{Embed, EmbedVec, GetEmbedDim, HashingEmbedding};
    use crate::utils::vec_stores::{InMemoryVectorStore, VectorStore};

    async fn indexed(texts: &[&str]) -> (Arc<HashingEmbedding>, Arc<InMemoryVectorStore>) {
        let embedder = Arc::new(HashingEmbedding::new(128));
        let store = Arc::new(InMemoryVectorStore::new());
        let mut entries = Vec::new();
        for text in texts {
            entries.push((embedder.embed(text).await.unwrap(), Document::new(*text).with_source("mem")));
        }
        store.add(entries).await.unwrap();
        (embedder, store)
    }

    #[tokio::test]
    async fn test_similarity_retrieval() {
        let (embedder, store) = indexed(&[
            "class RunnableBinding wraps a runnable with bound kwargs",
            "def parse_json(text) returns a dict",
            "unrelated cooking recipe for pasta",
        ]).await;
        let retriever = VectorStoreRetriever::new(embedder, store).with_search_type(SearchType::Similarity);
        let docs = retriever.retrieve("what is RunnableBinding runnable", 1).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("RunnableBinding"));
        assert!(docs[0].score.is_some());
    }

    /// Embeds the texts it knows to fixed vectors.
    struct FixedEmbedding(HashMap<&'static str, EmbedVec>);

    impl GetEmbedDim for FixedEmbedding {
        fn embedding_dim(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[async_trait]
    impl Embed for FixedEmbedding {
        async fn embed(&self, string: &str) -> Result<EmbedVec> {
            self.0.get(string).cloned().ok_or_else(|| anyhow!("no vector for {:?}", string))
        }
    }

    #[tokio::test]
    async fn test_mmr_skips_duplicates() {
        let embedder = Arc::new(FixedEmbedding(HashMap::from([
            ("query", vec![1.0, 0.0]),
            ("exact", vec![1.0, 0.0]),
            ("near", vec![0.8, 0.6]),
            ("other", vec![0.0, 1.0]),
        ])));
        let store = Arc::new(InMemoryVectorStore::new());
        let mut entries = Vec::new();
        for text in ["exact", "exact", "near", "other"] {
            entries.push((embedder.embed(text).await.unwrap(), Document::new(text)));
        }
        store.add(entries).await.unwrap();

        let similarity = VectorStoreRetriever::new(embedder.clone(), store.clone())
            .with_search_type(SearchType::Similarity);
        let docs = similarity.retrieve("query", 2).await.unwrap();
        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["exact", "exact"]);

        // 0.3 * relevance - 0.7 * redundancy: after "exact", "other" scores 0, "near" -0.32, the duplicate -0.4
        let mmr = VectorStoreRetriever::new(embedder, store)
            .with_search_type(SearchType::Mmr { fetch_k: 20, lambda: 0.3 });
        let docs = mmr.retrieve("query", 2).await.unwrap();
        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["exact", "other"]);
    }

    #[tokio::test]
    async fn test_retrieve_context_stage() {
        let (embedder, store) = indexed(&["first chunk", "second chunk"]).await;
        let retriever = Arc::new(VectorStoreRetriever::new(embedder, store));
        let pipeline = Pipeline::new().then(retrieve_context(retriever, 2, "input"));
        let out = pipeline.run(json!({"input": "chunk"})).await.unwrap();
        let context = out["context"].as_str().unwrap();
        assert!(context.contains("first chunk") && context.contains("second chunk"));
        assert_eq!(out["input"], "chunk");
    }
}
