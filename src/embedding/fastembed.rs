//! FastEmbed (ONNX) embedder, behind the `fastembed-embeddings` feature.

use super::Embedder;
use crate::{Error, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::Mutex;

/// ONNX-based embedder backed by fastembed.
pub struct FastEmbedEmbedder {
    model: Mutex<TextEmbedding>,
    dimensions: usize,
}

impl FastEmbedEmbedder {
    /// Loads the named model, downloading into `cache_dir` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Embedding`] when the model cannot be resolved or
    /// initialized.
    pub fn load(model_id: &str, cache_dir: &Path, dimensions: usize) -> Result<Self> {
        let model_kind = resolve_model(model_id)?;
        let options = InitOptions::new(model_kind).with_cache_dir(cache_dir.to_path_buf());
        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("load '{model_id}': {e}")))?;
        Ok(Self {
            model: Mutex::new(model),
            dimensions,
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| Error::Embedding(e.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("model returned no vector".to_string()))
    }
}

fn resolve_model(model_id: &str) -> Result<EmbeddingModel> {
    match model_id {
        "all-minilm-l6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        },
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        other => Err(Error::Embedding(format!("unknown embedding model: {other}"))),
    }
}
