use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::BackendError;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Turns texts into fixed-length vectors, one per input, order and count
/// preserved.
#[async_trait]
pub trait Embedder {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Deterministic local embedder hashing word unigrams and character
/// trigrams into a normalized bag-of-features vector. No model download,
/// no network; the offline and test backend.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let width = self.dimensions.max(1);
        let mut vector = vec![0f32; width];
        let lowered = text.to_lowercase();

        for word in lowered.split_whitespace() {
            vector[bucket(word.as_bytes(), width)] += 1.0;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                vector[bucket(trigram.as_bytes(), width)] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

// FNV-1a, fixed so stored vectors stay comparable across builds
fn bucket(token: &[u8], width: usize) -> usize {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in token {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % width as u64) as usize
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, BackendError> {
        Url::parse(base_url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != texts.len() {
            return Err(BackendError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!(
                    "{} embeddings returned for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            });
        }

        for entry in &parsed.data {
            if entry.embedding.len() != self.dimensions {
                return Err(BackendError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: format!(
                        "embedding dimension {} != configured {}",
                        entry.embedding.len(),
                        self.dimensions
                    ),
                });
            }
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// The closed set of embedding backends, selected once by configuration.
#[derive(Clone)]
pub enum EmbedderBackend {
    Hashing(HashingEmbedder),
    Remote(RemoteEmbedder),
}

#[async_trait]
impl Embedder for EmbedderBackend {
    fn dimensions(&self) -> usize {
        match self {
            Self::Hashing(embedder) => embedder.dimensions(),
            Self::Remote(embedder) => embedder.dimensions(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        match self {
            Self::Hashing(embedder) => embedder.embed_batch(texts).await,
            Self::Remote(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Embedder, HashingEmbedder, RemoteEmbedder};

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["famotidine 20mg tablets".to_string()];
        let first = embedder.embed_batch(&texts).await.unwrap();
        let second = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hashing_embedder_preserves_order_and_count() {
        let embedder = HashingEmbedder { dimensions: 32 };
        let texts = vec![
            "aspirin from VendorA".to_string(),
            "gauze from VendorB".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder { dimensions: 16 };
        let vectors = embedder.embed_batch(&["".to_string()]).await.unwrap();
        assert!(vectors[0].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn remote_embedder_rejects_bad_endpoint() {
        let result = RemoteEmbedder::new("not a url", None, "text-embedding-3-small", 128);
        assert!(result.is_err());
    }
}
