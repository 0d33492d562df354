//! Image embedding boundary. Providers turn an image URL into a vector; the
//! crawler treats every provider failure as "no embedding" and keeps the record.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;

use crate::crawler::config::EmbeddingConfig;
use crate::crawler::errors::{CrawlerResult, EmbeddingError, ValidationError};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length every vector from this provider must have
    fn dimension(&self) -> usize;

    async fn embed(&self, image_url: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Ask the provider for an embedding, folding every failure into `None`
pub async fn embed_or_absent(embedder: &dyn Embedder, image_url: &str) -> Option<Vec<f32>> {
    let checked = match embedder.embed(image_url).await {
        Ok(vector) => check_vector(vector, embedder.dimension()),
        Err(e) => Err(e),
    };
    match checked {
        Ok(vector) => {
            debug!("embedded {} ({} dims)", image_url, vector.len());
            Some(vector)
        }
        Err(e) => {
            warn!("Failed to generate embedding for {}: {}", image_url, e);
            None
        }
    }
}

/// Enforce the expected length and L2-normalize
pub fn check_vector(mut vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::Decode("vector contains non-finite values".to_string()));
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(EmbeddingError::ZeroVector);
    }
    for v in vector.iter_mut() {
        *v /= norm;
    }
    Ok(vector)
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Downloads the image and posts its bytes to an embedding service that
/// answers `{"embedding": [..]}`
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
    max_image_bytes: u64,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> CrawlerResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| ValidationError::InvalidInput("embedding.endpoint is not set".to_string()))?;

        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ValidationError::InvalidInput(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, agent);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Service(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            dimension: config.dimension,
            max_image_bytes: config.max_image_bytes,
        })
    }

    async fn fetch_image(&self, image_url: &str) -> Result<(Vec<u8>, String), EmbeddingError> {
        let fetch_err = |reason: String| EmbeddingError::Fetch {
            url: image_url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(image_url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("status {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        if let Some(declared) = response.content_length() {
            check_image_size(image_url, declared, self.max_image_bytes)?;
        }

        // Content-Length may be absent or wrong, so the limit also applies while reading
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_err(e.to_string()))? {
            bytes.extend_from_slice(&chunk);
            check_image_size(image_url, bytes.len() as u64, self.max_image_bytes)?;
        }
        if bytes.is_empty() {
            return Err(fetch_err("empty body".to_string()));
        }
        Ok((bytes, content_type))
    }
}

fn check_image_size(image_url: &str, size: u64, limit: u64) -> Result<(), EmbeddingError> {
    if size > limit {
        return Err(EmbeddingError::Fetch {
            url: image_url.to_string(),
            reason: format!("image is {} bytes, limit is {}", size, limit),
        });
    }
    Ok(())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, image_url: &str) -> Result<Vec<f32>, EmbeddingError> {
        let (bytes, content_type) = self.fetch_image(image_url).await?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| EmbeddingError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Service(format!("status {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
        Ok(parsed.embedding)
    }
}
