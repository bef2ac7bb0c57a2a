use std::sync::Arc;
use anyhow::Result;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::pipeline::errors::PipelineError;

/// Vector of floats representing an embedding.
pub type EmbedVec = Vec<f32>;

/// Trait for getting the embedding dimension.
pub trait GetEmbedDim {
    fn embedding_dim(&self) -> Option<usize>;
}

/// Trait for embedding a string into a vector.
#[async_trait]
pub trait Embed: GetEmbedDim + Send + Sync {
    async fn embed(&self, string: &str) -> Result<EmbedVec>;

    /// Embeds many strings. One request per string unless overridden.
    async fn embed_batch(&self, strings: &[String]) -> Result<Vec<EmbedVec>> {
        let mut embeddings = Vec::with_capacity(strings.len());
        for string in strings {
            embeddings.push(self.embed(string).await?);
        }
        Ok(embeddings)
    }
}

impl<T: GetEmbedDim + ?Sized> GetEmbedDim for Arc<T> {
    fn embedding_dim(&self) -> Option<usize> {
        (**self).embedding_dim()
    }
}

#[async_trait]
impl<T: Embed + ?Sized> Embed for Arc<T> {
    async fn embed(&self, string: &str) -> Result<EmbedVec> {
        (**self).embed(string).await
    }

    async fn embed_batch(&self, strings: &[String]) -> Result<Vec<EmbedVec>> {
        (**self).embed_batch(strings).await
    }
}

/// Embedding model from OpenAI API.
#[derive(Clone, Debug)]
pub struct OpenAIEmbedding {
    pub client: Client<OpenAIConfig>,
    pub embedding_model: String,
}

impl OpenAIEmbedding {
    pub fn new(client: Client<OpenAIConfig>, embedding_model: impl Into<String>) -> Self {
        Self {
            client,
            embedding_model: embedding_model.into(),
        }
    }
}

impl GetEmbedDim for OpenAIEmbedding {
    fn embedding_dim(&self) -> Option<usize> {
        match self.embedding_model.as_str() {
            "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }
}

#[async_trait]
impl Embed for OpenAIEmbedding {
    async fn embed(&self, string: &str) -> Result<EmbedVec> {
        let mut embeddings = self.embed_batch(&[string.to_string()]).await?;
        embeddings.pop()
            .ok_or_else(|| PipelineError::malformed("one embedding", "<empty response>").into())
    }

    /// One request for the whole batch.
    async fn embed_batch(&self, strings: &[String]) -> Result<Vec<EmbedVec>> {
        if strings.is_empty() {
            return Ok(Vec::new());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.embedding_model.as_str())
            .input(strings.to_vec())
            .build()?;
        let response = self.client.embeddings().create(request).await
            .map_err(|e| PipelineError::upstream("embedding", e))?;
        let mut data = response.data;
        if data.len() != strings.len() {
            return Err(PipelineError::malformed(
                format!("{} embeddings", strings.len()),
                format!("{} embeddings", data.len()),
            ).into());
        }
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

/// Local embedding by feature hashing of lower-cased word tokens, L2-normalized.
///
/// Needs no service and is deterministic across platforms and releases, since tokens are bucketed by SHA-256.
/// Handy for offline indexes and tests. Similarity is lexical, not semantic.
#[derive(Clone, Debug)]
pub struct HashingEmbedding {
    pub dim: usize,
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self { dim: 384 }
    }
}

impl HashingEmbedding {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_sync(&self, string: &str) -> EmbedVec {
        let mut vec = vec![0f32; self.dim];
        let tokens = string
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let hash = token_hash(&token);
            let idx = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vec[idx] += sign;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        }
        vec
    }
}

/// First eight bytes of the SHA-256 digest, big-endian, so buckets never change across builds.
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl GetEmbedDim for HashingEmbedding {
    fn embedding_dim(&self) -> Option<usize> {
        Some(self.dim)
    }
}

#[async_trait]
impl Embed for HashingEmbedding {
    async fn embed(&self, string: &str) -> Result<EmbedVec> {
        Ok(self.embed_sync(string))
    }
}
