//! OpenAI-compatible HTTP embedding backend.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EmbeddingBackend, EmbeddingError};

const MAX_RETRIES: u32 = 3;

/// Request body for embedding API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

/// Response from embedding API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings served by any `/embeddings` endpoint speaking the OpenAI
/// wire format (OpenRouter, LM Studio, Ollama, vLLM).
pub struct RemoteEmbeddings {
    api_key: String,
    model: String,
    name: String,
    dimensions: usize,
    client: Client,
    base_url: String,
}

impl RemoteEmbeddings {
    /// Connect and discover the model's dimension with a sample request.
    pub fn connect(base_url: &str, model: &str, api_key: &str) -> Result<Self, EmbeddingError> {
        let mut backend = Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            name: format!("remote::{}", model),
            dimensions: 0,
            client: Client::new(),
            base_url: base_url.to_string(),
        };
        let sample = backend.send_request("dimension check")?;
        if sample.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "sample request returned an empty vector".to_string(),
            ));
        }
        backend.dimensions = sample.len();
        Ok(backend)
    }

    fn send_request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let mut retry_count = 0;
        let mut backoff_secs = 1u64;

        loop {
            debug!("Sending embedding request to {}", self.base_url);

            let response = self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

            let status = response.status();

            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                return parsed
                    .data
                    .into_iter()
                    .min_by_key(|d| d.index)
                    .map(|d| d.embedding)
                    .ok_or_else(|| {
                        EmbeddingError::InvalidResponse("no embedding returned".to_string())
                    });
            }

            if status.as_u16() == 429 {
                retry_count += 1;
                if retry_count > MAX_RETRIES {
                    return Err(EmbeddingError::RateLimited(backoff_secs));
                }

                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                warn!(
                    "Rate limited, retrying after {} seconds (attempt {}/{})",
                    retry_after, retry_count, MAX_RETRIES
                );
                thread::sleep(Duration::from_secs(retry_after));
                backoff_secs *= 2;
                continue;
            }

            let error_body = response
                .text()
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::ApiError(format!(
                "{}: {}",
                status.as_u16(),
                error_body
            )));
        }
    }
}

impl EmbeddingBackend for RemoteEmbeddings {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.send_request(text)?;
        if vector.len() != self.dimensions {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            ))
            .into());
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
