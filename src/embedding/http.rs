//! Remote embedding model behind an OpenAI-compatible `/v1/embeddings`
//! endpoint. Used for hosted text models and for image models (the input is
//! then the image reference).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

/// Calls are made from `spawn_blocking` threads, which drive the async
/// client on the runtime captured at construction.
pub struct HttpEmbeddingProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    runtime: Handle,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl HttpEmbeddingProvider {
    /// Must be called from within a tokio runtime.
    pub fn new(endpoint: &str, model: &str, config: &EmbeddingConfig) -> Result<Self> {
        anyhow::ensure!(!endpoint.trim().is_empty(), "embedding endpoint is empty");
        let runtime = Handle::try_current().context("HTTP embedding provider needs a tokio runtime")?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no API key set, sending unauthenticated requests");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            client,
            runtime,
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<String> {
        let payload = serde_json::to_vec(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        })?;
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint))?;
        let status = response.status();
        let body = response.text().await.context("failed to read embedding response")?;
        anyhow::ensure!(
            status.is_success(),
            "embedding endpoint returned HTTP {status}: {}",
            truncate(&body, 200)
        );
        Ok(body)
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input])?
            .pop()
            .context("endpoint returned no vector")
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        let body = self.runtime.block_on(self.request(inputs))?;
        parse_response(&body, inputs.len())
    }
}

/// Decode a response body into vectors ordered like the request inputs.
fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse =
        serde_json::from_str(body).context("malformed embedding response")?;
    anyhow::ensure!(
        response.data.len() == expected,
        "expected {expected} vectors, endpoint returned {}",
        response.data.len()
    );

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        anyhow::ensure!(index < expected, "vector index {index} out of range");
        anyhow::ensure!(slots[index].is_none(), "duplicate vector index {index}");
        slots[index] = Some(datum.embedding);
    }
    slots
        .into_iter()
        .map(|s| s.context("endpoint skipped an input"))
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
