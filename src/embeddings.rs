use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateEmbeddingRequestArgs, EmbeddingInput},
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};

/// Turns text into a fixed-length vector. Identical input gives identical output.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier used to scope cached vectors
    fn model_id(&self) -> &str;
}

/// Storage for previously computed embeddings
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, model: &str, text: &str) -> Result<Option<Vec<f32>>>;
    async fn put(&self, model: &str, text: &str, embedding: &[f32]) -> Result<()>;
}

pub struct OpenAiEncoder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEncoder {
    pub fn new(api_key: &str, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.to_string());
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Encoder for OpenAiEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        info!("Generating OpenAI embedding for text: {}", text);

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| ConciergeError::Encoding(format!("invalid embedding request: {e}")))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| ConciergeError::Encoding(e.to_string()))?;

        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| ConciergeError::Encoding("No embeddings returned".to_string()))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Offline bag-of-words encoder: lowercased alphanumeric tokens are hashed
/// into `dimensions` buckets and the result is L2-normalised.
pub struct HashingEncoder {
    dimensions: usize,
    id: String,
}

impl HashingEncoder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            id: format!("hashing-{dimensions}"),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl Encoder for HashingEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(token)] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Wraps an encoder with a read-through cache. Cache failures never fail an encode.
pub struct CachedEncoder {
    inner: Arc<dyn Encoder>,
    cache: Arc<dyn EmbeddingCache>,
}

impl CachedEncoder {
    pub fn new(inner: Arc<dyn Encoder>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Encoder for CachedEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.inner.model_id();
        match self.cache.get(model, text).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!("Embedding cache lookup failed: {}", e),
        }

        let embedding = self.inner.encode(text).await?;

        if let Err(e) = self.cache.put(model, text, &embedding).await {
            warn!("Failed to cache embedding: {}", e);
        }

        Ok(embedding)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
