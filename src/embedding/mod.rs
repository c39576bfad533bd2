//! Content-to-vector models and the vector store.
//!
//! Provides the [`EmbeddingProvider`] trait, a local ONNX text model
//! ([`local`]), an HTTP client for OpenAI-compatible embedding endpoints
//! ([`http`]), and the persisted vectors themselves ([`store`]). Models are
//! built from configuration via [`create_models`].

pub mod http;
pub mod local;
pub mod store;

use std::sync::Arc;

use anyhow::Result;

use crate::catalog::types::ContentKind;
use crate::config::EmbeddingConfig;

/// Turns text (or an image reference) into a vector.
///
/// All methods are synchronous; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored next to every vector this provider writes.
    fn model_name(&self) -> &str;

    /// Embed a single input.
    fn embed(&self, input: &str) -> Result<Vec<f32>>;

    /// Embed several inputs in one call, preserving order. Implementations
    /// override this when the backend supports real batching.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        inputs.iter().map(|i| self.embed(i)).collect()
    }
}

/// The text model plus the optional image model.
#[derive(Clone)]
pub struct EmbeddingModels {
    pub text: Arc<dyn EmbeddingProvider>,
    pub image: Option<Arc<dyn EmbeddingProvider>>,
}

impl EmbeddingModels {
    pub fn new(text: Arc<dyn EmbeddingProvider>, image: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { text, image }
    }

    /// The model responsible for a content kind, if one is configured.
    pub fn for_kind(&self, kind: ContentKind) -> Option<&Arc<dyn EmbeddingProvider>> {
        if kind.is_image() {
            self.image.as_ref()
        } else {
            Some(&self.text)
        }
    }
}

/// Build the text and image models from config.
///
/// Text: `"local"` (ONNX all-MiniLM-L6-v2, run `lensmatch model download`
/// first) or `"http"`. Image: `"none"` or `"http"`.
pub fn create_models(config: &EmbeddingConfig) -> Result<EmbeddingModels> {
    let text: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "local" => Arc::new(local::LocalEmbeddingProvider::new(config)?),
        "http" => Arc::new(http::HttpEmbeddingProvider::new(
            &config.endpoint,
            &config.model,
            config,
        )?),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, http"),
    };

    let image: Option<Arc<dyn EmbeddingProvider>> = match config.image_provider.as_str() {
        "none" | "" => None,
        "http" => {
            let endpoint = if config.image_endpoint.is_empty() {
                &config.endpoint
            } else {
                &config.image_endpoint
            };
            Some(Arc::new(http::HttpEmbeddingProvider::new(
                endpoint,
                &config.image_model,
                config,
            )?))
        }
        other => anyhow::bail!("unknown image provider: {other}. Supported: none, http"),
    };

    tracing::info!(
        text_model = text.model_name(),
        image_model = image.as_ref().map(|m| m.model_name()).unwrap_or("none"),
        "embedding models ready"
    );
    Ok(EmbeddingModels { text, image })
}
