//! Vector stores: nearest-neighbour search over embedded documents.

use std::sync::RwLock;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::utils::embedding::EmbedVec;
use crate::utils::retrievers::Document;

pub type Vector = EmbedVec;

/// A document found by a vector search, with its similarity to the query and its stored vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
    pub vector: Vector,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, entries: Vec<(Vector, Document)>) -> Result<()>;

    /// The `k` entries most similar to `query`, most similar first.
    async fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredDocument>>;
}

/// Cosine similarity. Zero vectors are similar to nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Maximal marginal relevance: picks `k` of `candidates`, trading similarity to `query` (weight `lambda`)
/// against similarity to the already picked ones (weight `1 - lambda`). Returns candidate indices in pick order.
pub fn maximal_marginal_relevance(query: &[f32], candidates: &[Vector], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let relevance: Vec<f32> = candidates.iter().map(|c| cosine_similarity(query, c)).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k);
    while selected.len() < k {
        let best = (0..candidates.len())
            .filter(|idx| !selected.contains(idx))
            .map(|idx| {
                let redundancy = selected.iter()
                    .map(|&s| cosine_similarity(&candidates[idx], &candidates[s]))
                    .fold(f32::NEG_INFINITY, f32::max);
                let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
                (idx, lambda * relevance[idx] - (1.0 - lambda) * redundancy)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        match best {
            Some((idx, _)) => selected.push(idx),
            None => break,
        }
    }
    selected
}

/// A brute-force store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<(Vector, Document)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, entries: Vec<(Vector, Document)>) -> Result<()> {
        let mut store = self.entries.write().map_err(|_| anyhow!("vector store lock poisoned"))?;
        if let (Some((first, _)), Some((new, _))) = (store.first(), entries.first()) {
            if first.len() != new.len() {
                return Err(anyhow!("vector dimension mismatch: store has {}, got {}", first.len(), new.len()));
            }
        }
        store.extend(entries);
        Ok(())
    }

    async fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredDocument>> {
        let store = self.entries.read().map_err(|_| anyhow!("vector store lock poisoned"))?;
        let mut scored: Vec<ScoredDocument> = store.iter()
            .map(|(vector, document)| ScoredDocument {
                document: document.clone(),
                score: cosine_similarity(query, vector),
                vector: vector.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(feature = "qdrant")]
mod qdrant {
    use std::collections::HashMap;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use anyhow::Result;
    use async_trait::async_trait;
    use qdrant_client::prelude::{CreateCollection, Distance, QdrantClient, QdrantClientConfig, SearchPoints};
    use qdrant_client::qdrant::{CollectionOperationResponse, PointId, PointStruct, ScoredPoint, VectorParams, VectorsConfig};
    use qdrant_client::qdrant::value::Kind;
    use qdrant_client::qdrant::vectors::VectorsOptions;
    use qdrant_client::qdrant::vectors_config::Config;
    use url::Url;

    use super::{ScoredDocument, Vector, VectorStore};
    use crate::utils::retrievers::Document;

    /// A collection of a Qdrant cluster. Documents are stored as `content`/`source` payload.
    pub struct QdrantCloudDB {
        pub client: QdrantClient,
        pub collection: String,
    }

    impl QdrantCloudDB {
        pub fn new(collection: impl Into<String>, cluster_url: Url, api_key: String) -> Result<Self> {
            let mut config = QdrantClientConfig::from_url(cluster_url.as_str());
            config.set_api_key(&api_key);
            let client = QdrantClient::new(Some(config))?;
            Ok(Self {
                client,
                collection: collection.into(),
            })
        }

        /// Creates the collection with cosine distance.
        pub async fn create_collection(&self, vector_size: u64) -> Result<CollectionOperationResponse> {
            let create = CreateCollection {
                collection_name: self.collection.clone(),
                vectors_config: Some(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: vector_size,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    }))
                }),
                ..Default::default()
            };
            self.client.create_collection(&create).await
        }

        fn create_point(vec: Vector, document: &Document) -> PointStruct {
            let mut hasher = DefaultHasher::new();
            document.content.hash(&mut hasher);
            document.source.hash(&mut hasher);
            let mut payload = HashMap::from([("content".to_string(), document.content.clone().into())]);
            if let Some(source) = &document.source {
                payload.insert("source".to_string(), source.clone().into());
            }
            PointStruct {
                id: Some(PointId::from(hasher.finish())),
                payload,
                vectors: Some(vec.into()),
            }
        }

        fn to_scored_document(point: ScoredPoint) -> Option<ScoredDocument> {
            let text = |key: &str| point.payload.get(key).and_then(|value| match &value.kind {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            });
            let content = text("content")?;
            let source = text("source");
            let vector = point.vectors.clone()
                .and_then(|v| v.vectors_options)
                .and_then(|options| match options {
                    VectorsOptions::Vector(vector) => Some(vector.data),
                    _ => None,
                })
                .unwrap_or_default();
            Some(ScoredDocument {
                document: Document { content, source, score: Some(point.score) },
                score: point.score,
                vector,
            })
        }
    }

    #[async_trait]
    impl VectorStore for QdrantCloudDB {
        async fn add(&self, entries: Vec<(Vector, Document)>) -> Result<()> {
            let points = entries.into_iter()
                .map(|(vec, document)| Self::create_point(vec, &document))
                .collect();
            self.client.upsert_points_blocking(&self.collection, points, None).await.map(|_| ())
        }

        async fn search(&self, query: &Vector, k: usize) -> Result<Vec<ScoredDocument>> {
            let response = self.client.search_points(&SearchPoints {
                collection_name: self.collection.clone(),
                vector: query.clone(),
                limit: k as u64,
                with_payload: Some(true.into()),
                with_vectors: Some(true.into()),
                ..Default::default()
            }).await?;
            Ok(response.result.into_iter().filter_map(Self::to_scored_document).collect())
        }
    }
}

#[cfg(feature = "qdrant")]
pub use qdrant::QdrantCloudDB;
