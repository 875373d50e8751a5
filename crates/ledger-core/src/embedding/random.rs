use rand::Rng;

use super::provider::EmbeddingProvider;
use crate::error::Result;

pub const DEFAULT_DIMENSIONS: usize = 128;

/// Placeholder provider: every call returns fresh uniform noise in `[0, 1)`.
///
/// The text is ignored, so similarity between two vectors carries no meaning.
/// It exists so the full insert/retrieve pipeline runs without any embedding
/// model. Switch `embedding.provider` to `hash`, `ollama` or `openai` for
/// repeatable results.
pub struct RandomEmbeddingProvider {
    dimensions: usize,
    model_id: String,
}

impl Default for RandomEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl RandomEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("random-{dimensions}d"),
        }
    }

    fn noise(dimensions: usize) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..dimensions).map(|_| rng.gen::<f32>()).collect()
    }
}

impl EmbeddingProvider for RandomEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Self::noise(self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_in_unit_interval() {
        let provider = RandomEmbeddingProvider::default();
        let vector = provider.embed("Spent $15 on lunch").await.unwrap();
        assert_eq!(vector.len(), 128);
        assert!(vector.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[tokio::test]
    async fn test_text_is_ignored() {
        let provider = RandomEmbeddingProvider::new(16);
        let a = provider.embed("same").await.unwrap();
        let b = provider.embed("same").await.unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_dimensions_clamped() {
        let provider = RandomEmbeddingProvider::new(0);
        assert_eq!(provider.dimensions(), 1);
        assert_eq!(provider.model_id(), "random-1d");
    }
}
