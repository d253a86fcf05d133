//! Embedding generation.
//!
//! The provider turns text into fixed-dimension L2-normalized vectors.
//! The model behind it is a black box: a deterministic hashed projection by
//! default, or FastEmbed when the `fastembed-embeddings` feature is compiled
//! in and a model id is configured. The model loads lazily on first call and
//! all access is serialized behind a mutex; callers must not assume parallel
//! embedding speedups.
//!
//! Embedding failure is recoverable by design: capture proceeds without a
//! vector and the sync service backfills later. A circuit breaker keeps a
//! persistently broken model from stalling every capture.

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

mod breaker;
mod hashed;

#[cfg(feature = "fastembed-embeddings")]
mod fastembed;

pub use breaker::CircuitBreaker;
pub use hashed::HashedEmbedder;

#[cfg(feature = "fastembed-embeddings")]
pub use fastembed::FastEmbedEmbedder;

use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Mutex;

/// Trait for embedding generators.
pub trait Embedder: Send {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// L2-normalizes a vector in place. The zero vector stays zero.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Lazily-initialized embedding provider with breaker protection.
pub struct EmbeddingProvider {
    config: EmbeddingConfig,
    models_dir: PathBuf,
    model: OnceCell<Mutex<Box<dyn Embedder>>>,
    breaker: Mutex<CircuitBreaker>,
}

impl EmbeddingProvider {
    /// Creates a provider; no model is loaded until the first embed.
    #[must_use]
    pub fn new(config: EmbeddingConfig, models_dir: PathBuf) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_failure_threshold,
            std::time::Duration::from_millis(config.breaker_reset_ms),
        );
        Self {
            config,
            models_dir,
            model: OnceCell::new(),
            breaker: Mutex::new(breaker),
        }
    }

    /// Returns the fixed embedding dimension D.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Returns the all-zero vector used when no embedding is available.
    #[must_use]
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.config.dimensions]
    }

    /// Forces the model to load now instead of on the first embed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Embedding`] when the model cannot be loaded.
    pub fn warmup(&self) -> Result<()> {
        self.model_cell().map(|_| ())
    }

    /// Returns true once the model has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Embeds `text` into a D-dimensional L2-normalized vector.
    ///
    /// Empty or whitespace-only text returns the zero vector without
    /// touching the model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Embedding`] on model failure or while the circuit
    /// is open.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(self.zero_vector());
        }

        {
            let mut breaker = self
                .breaker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !breaker.allow() {
                metrics::counter!("engram_embedding_breaker_rejections_total").increment(1);
                return Err(Error::Embedding("circuit breaker open".to_string()));
            }
        }

        let result = self.embed_inner(text);

        let mut breaker = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match &result {
            Ok(_) => breaker.on_success(),
            Err(e) => {
                if breaker.on_failure() {
                    tracing::warn!(error = %e, "embedding circuit breaker opened");
                    metrics::counter!("engram_embedding_breaker_trips_total").increment(1);
                }
            },
        }
        result
    }

    fn embed_inner(&self, text: &str) -> Result<Vec<f32>> {
        let cell = self.model_cell()?;
        let model = cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut vector = model.embed(text)?;
        if vector.len() != self.config.dimensions {
            return Err(Error::Embedding(format!(
                "model produced {} dimensions, expected {}",
                vector.len(),
                self.config.dimensions
            )));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn model_cell(&self) -> Result<&Mutex<Box<dyn Embedder>>> {
        self.model
            .get_or_try_init(|| self.build_model().map(Mutex::new))
    }

    #[cfg(feature = "fastembed-embeddings")]
    fn build_model(&self) -> Result<Box<dyn Embedder>> {
        if let Some(model_id) = &self.config.model_id {
            let model =
                FastEmbedEmbedder::load(model_id, &self.models_dir, self.config.dimensions)?;
            tracing::info!(model = model_id, "loaded embedding model");
            return Ok(Box::new(model));
        }
        Ok(Box::new(HashedEmbedder::new(self.config.dimensions)))
    }

    #[cfg(not(feature = "fastembed-embeddings"))]
    fn build_model(&self) -> Result<Box<dyn Embedder>> {
        if let Some(model_id) = &self.config.model_id {
            tracing::warn!(
                model = model_id,
                dir = %self.models_dir.display(),
                "built without fastembed-embeddings; using hashed embeddings"
            );
        }
        Ok(Box::new(HashedEmbedder::new(self.config.dimensions)))
    }
}
