use super::provider::EmbeddingProvider;
use crate::error::Result;

/// Deterministic byte-hash embeddings.
///
/// The same text always maps to the same unit-length vector, which makes
/// retrieval repeatable in tests and offline use. It is NOT semantic: two
/// paraphrases land far apart.
pub struct HashEmbeddingProvider;

const DIMENSIONS: usize = 128;

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self
    }
}

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    fn hash_text(text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; DIMENSIONS];
        let normalized = text.to_lowercase();
        for (i, byte) in normalized.bytes().enumerate() {
            let idx = (i * 31 + byte as usize) % DIMENSIONS;
            vec[idx] += 1.0 + (i as f32 + 1.0).ln() * 0.1;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::hash_text(text))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model_id(&self) -> &str {
        "hash-128d"
    }
}
