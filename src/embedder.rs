//! Text embedding: external collaborator plus a deterministic local fallback

use crate::config::EmbeddingConfig;
use crate::error::{CollaboratorError, EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::debug;

/// Deterministic text → fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimension D
    fn dimension(&self) -> usize;

    /// Embed a batch of texts; output order matches input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP embedding collaborator
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| CollaboratorError::Disabled("no embedding url configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("embedding {} texts via {}", texts.len(), self.url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout("embedding".into())
                } else {
                    CollaboratorError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => CollaboratorError::Unauthorized,
                429 => CollaboratorError::RateLimited,
                _ => CollaboratorError::ConnectionFailed(format!("HTTP {}", status)),
            }
            .into());
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        if body.embeddings.len() != texts.len() {
            return Err(CollaboratorError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            ))
            .into());
        }
        for vector in &body.embeddings {
            if vector.len() != self.dimension {
                return Err(EngineError::DataIntegrity(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                )));
            }
        }

        Ok(body.embeddings)
    }
}

/// Deterministic hash-bucket embedder used offline and in tests.
///
/// Tokens hash into buckets; the vector is L2-normalized, so cosine
/// similarity reflects token overlap.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in crate::bm25::tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            // Sign from a second hash bit spreads mass across the sphere
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Select the embedder implied by configuration
pub fn build_embedder(config: &EmbeddingConfig, dimension: usize) -> Result<std::sync::Arc<dyn Embedder>> {
    match &config.url {
        Some(_) => Ok(std::sync::Arc::new(HttpEmbedder::new(config, dimension)?)),
        None => Ok(std::sync::Arc::new(HashEmbedder::new(dimension))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["Paris is the capital of France".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_reflects_overlap() {
        let embedder = HashEmbedder::new(128);
        let texts = vec![
            "Acme is headquartered in Paris".to_string(),
            "Where is Acme located".to_string(),
            "completely unrelated cooking recipe".to_string(),
        ];
        let vectors = embedder.embed(&texts).await.unwrap();
        let near = crate::vector::cosine_similarity(&vectors[0], &vectors[1]);
        let far = crate::vector::cosine_similarity(&vectors[0], &vectors[2]);
        assert!(near > far);
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_batch() {
        let embedder = HashEmbedder::new(16);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_embedder_against_stub() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3, 0.4]]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            url: Some(format!("{}/embed", server.uri())),
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(&config, 4).unwrap();
        let out = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(out, vec![vec![0.1, 0.2, 0.3, 0.4]]);
    }

    #[tokio::test]
    async fn test_http_embedder_dimension_mismatch() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            url: Some(server.uri()),
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(&config, 4).unwrap();
        let err = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataIntegrity);
    }
}
