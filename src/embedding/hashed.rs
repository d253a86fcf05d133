//! Deterministic hashed-feature embedder.
//!
//! Projects text onto a fixed-dimension space by hashing word unigrams and
//! bigrams into signed buckets. No model download, no runtime dependency,
//! stable across platforms and releases because the hash is SHA-256. Quality
//! is far below a learned model; the point is that hybrid search keeps a
//! usable vector signal (and deterministic tests) when none is installed.

use super::Embedder;
use crate::Result;
use sha2::{Digest, Sha256};

/// Deterministic hashed embedder.
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    /// Creates a hashed embedder with the given output dimension.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let raw = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let index = (raw as usize) % self.dimensions;
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];

        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            let (index, sign) = self.bucket(&bigram);
            vector[index] += sign * 0.5;
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_deterministic_across_instances() {
        let a = HashedEmbedder::new(128).embed("capture the decision").unwrap();
        let b = HashedEmbedder::new(128).embed("capture the decision").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_case_and_punctuation_folding() {
        let embedder = HashedEmbedder::new(128);
        let a = embedder.embed("Use PostgreSQL!").unwrap();
        let b = embedder.embed("use postgresql").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_text_differs() {
        let embedder = HashedEmbedder::new(128);
        let a = embedder.embed("jwt authentication tokens").unwrap();
        let b = embedder.embed("database connection pooling").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_word_order_matters_via_bigrams() {
        let embedder = HashedEmbedder::new(128);
        let a = embedder.embed("index then search").unwrap();
        let b = embedder.embed("search then index").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_is_zero() {
        let embedder = HashedEmbedder::new(64);
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
