//! Local ONNX Runtime text model (all-MiniLM-L6-v2 via `ort`).
//!
//! Tokenizes with `tokenizers`, runs the encoder, mean-pools token states
//! under the attention mask and L2-normalizes the result.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

/// all-MiniLM-L6-v2 was trained on sequences of at most 256 tokens.
const MAX_TOKENS: usize = 256;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct LocalEmbeddingProvider {
    model: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// SAFETY: the ort session is only touched through the Mutex, and the
// tokenizer is read-only after construction.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

/// Paths of the model and tokenizer inside the configured cache directory.
pub fn model_files(config: &EmbeddingConfig) -> (PathBuf, PathBuf) {
    let dir = crate::config::expand_tilde(&config.cache_dir);
    (dir.join(MODEL_FILE), dir.join(TOKENIZER_FILE))
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    anyhow::ensure!(
        path.exists(),
        "{what} not found at {}. Run `lensmatch model download` first.",
        path.display()
    );
    Ok(())
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_files(config);
        require_file(&model_path, "ONNX model")?;
        require_file(&tokenizer_path, "tokenizer")?;

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .with_context(|| format!("failed to load ONNX model {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(model = %config.model, path = %model_path.display(), "local text model loaded");

        Ok(Self {
            model: config.model.clone(),
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input])?
            .pop()
            .context("model returned no vector")
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(inputs.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let rows = encodings.len();
        let cols = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);

        let ids: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_ids().iter().map(|&id| id as i64))
            .collect();
        let mask: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_attention_mask().iter().map(|&m| m as i64))
            .collect();
        let segments = vec![0i64; rows * cols];

        let shape = vec![rows as i64, cols as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape.clone(), mask.clone().into_boxed_slice()))?;
        let segments_tensor = Tensor::from_array((shape, segments.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("onnx session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => segments_tensor,
        })?;

        // Export tools disagree on the output name.
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to read token states")?;
        let dims: &[i64] = &dims;
        anyhow::ensure!(dims.len() == 3, "unexpected token state shape {dims:?}");

        let pooled = mean_pool(data, &mask, rows, dims[1] as usize, cols, dims[2] as usize);
        Ok(pooled.iter().map(|v| l2_normalize(v)).collect())
    }
}

/// Average token states per row, counting only positions the mask keeps.
///
/// `states` is `[rows, seq, width]`; `mask` is `[rows, mask_cols]`.
fn mean_pool(states: &[f32], mask: &[i64], rows: usize, seq: usize, mask_cols: usize, width: usize) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|r| {
            let mut acc = vec![0.0f32; width];
            let mut kept = 0usize;
            for s in 0..seq.min(mask_cols) {
                if mask[r * mask_cols + s] == 0 {
                    continue;
                }
                let start = (r * seq + s) * width;
                for (a, x) in acc.iter_mut().zip(&states[start..start + width]) {
                    *a += x;
                }
                kept += 1;
            }
            if kept > 0 {
                acc.iter_mut().for_each(|a| *a /= kept as f32);
            }
            acc
        })
        .collect()
}

/// Scale to unit length. A zero vector comes back unchanged.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
