use crate::error::Result;

/// Turns text into a fixed-length vector for similarity search.
///
/// Every vector stored in one database must come from the same provider so
/// that dimensionality stays consistent across the corpus.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// The dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Model identifier string, shown by `ledger status`.
    fn model_id(&self) -> &str;
}
