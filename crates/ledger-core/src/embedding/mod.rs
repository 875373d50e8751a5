mod hash;
mod provider;
mod random;

pub use hash::HashEmbeddingProvider;
pub use provider::EmbeddingProvider;
pub use random::RandomEmbeddingProvider;

use crate::config::{self, EmbeddingConfig};
use crate::error::{LedgerError, Result};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returning embed results, keeps `clippy::type_complexity` quiet.
type EmbedFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Vec<Vec<f64>>, String>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Object-safe adapter around Rig's EmbeddingModel trait
// ---------------------------------------------------------------------------

/// Rig's `EmbeddingModel` is not dyn-compatible; this adapter erases its
/// associated types so `EmbeddingService` can hold any Rig model.
trait RigEmbedAdapter: Send + Sync {
    fn embed_text(&self, text: String) -> EmbedFuture<'_>;

    fn model_id(&self) -> &str;
}

impl<M> RigEmbedAdapter for RigModelWrapper<M>
where
    M: rig::embeddings::EmbeddingModel + Send + Sync + 'static,
{
    fn embed_text(&self, text: String) -> EmbedFuture<'_> {
        Box::pin(async move {
            let embeddings = self
                .model
                .embed_texts(vec![text])
                .await
                .map_err(|e| e.to_string())?;
            Ok(embeddings.into_iter().map(|e| e.vec).collect())
        })
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}

struct RigModelWrapper<M> {
    model: M,
    model_name: String,
}

// ---------------------------------------------------------------------------
// EmbeddingService
// ---------------------------------------------------------------------------

enum EmbeddingInner {
    /// Remote model through Rig (Ollama, OpenAI-compatible).
    Rig(Box<dyn RigEmbedAdapter>),
    Hash(HashEmbeddingProvider),
    Random(RandomEmbeddingProvider),
}

/// Embedding provider selected by `embedding.provider`.
pub struct EmbeddingService {
    inner: EmbeddingInner,
    provider: &'static str,
    dimensions: usize,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Placeholder model names that mean "pick the provider's usual model".
fn is_placeholder_model(model: &str) -> bool {
    model.starts_with("random-") || model == "hash-128d" || model.is_empty()
}

impl EmbeddingService {
    pub fn random(dimensions: usize) -> Self {
        let provider = RandomEmbeddingProvider::new(dimensions);
        Self {
            dimensions: provider.dimensions(),
            inner: EmbeddingInner::Random(provider),
            provider: "random",
        }
    }

    pub fn hash() -> Self {
        let provider = HashEmbeddingProvider::new();
        Self {
            dimensions: provider.dimensions(),
            inner: EmbeddingInner::Hash(provider),
            provider: "hash",
        }
    }

    /// Create an embedding service from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.provider.as_str() {
            "random" => Ok(Self::random(
                config.dimensions.unwrap_or(random::DEFAULT_DIMENSIONS),
            )),

            "hash" => Ok(Self::hash()),

            "openai" => {
                let api_key = config::resolve_api_key(
                    config.api_key.as_deref(),
                    config.env_var.as_deref(),
                    "OPENAI_API_KEY",
                    "openai",
                    "embedding",
                )?;

                let model_name = if is_placeholder_model(&config.model) {
                    "text-embedding-3-small".to_string()
                } else {
                    config.model.clone()
                };
                let dims = config.dimensions.unwrap_or(1536);

                let mut builder =
                    rig::providers::openai::Client::<reqwest::Client>::builder().api_key(&api_key);
                if let Some(ref base_url) = config.base_url {
                    builder = builder.base_url(base_url);
                }
                let client = builder.build().map_err(|e| {
                    LedgerError::Embedding(format!("failed to build OpenAI client: {e}"))
                })?;

                use rig::prelude::EmbeddingsClient;
                let model = client.embedding_model_with_ndims(&model_name, dims);

                Ok(Self {
                    inner: EmbeddingInner::Rig(Box::new(RigModelWrapper { model, model_name })),
                    provider: "openai",
                    dimensions: dims,
                })
            }

            "ollama" => {
                let model_name = if is_placeholder_model(&config.model) {
                    "nomic-embed-text".to_string()
                } else {
                    config.model.clone()
                };
                let base_url = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string());
                let dims = config.dimensions.unwrap_or(768);

                let client = rig::providers::ollama::Client::<reqwest::Client>::builder()
                    .api_key(rig::client::Nothing)
                    .base_url(&base_url)
                    .build()
                    .map_err(|e| {
                        LedgerError::Embedding(format!("failed to build Ollama client: {e}"))
                    })?;

                use rig::prelude::EmbeddingsClient;
                let model = client.embedding_model_with_ndims(&model_name, dims);

                Ok(Self {
                    inner: EmbeddingInner::Rig(Box::new(RigModelWrapper { model, model_name })),
                    provider: "ollama",
                    dimensions: dims,
                })
            }

            other => Err(LedgerError::Config(format!(
                "unknown embedding provider: '{other}' \
                 (expected 'random', 'hash', 'ollama', or 'openai')"
            ))),
        }
    }

    /// Embed one text. Remote failures are returned as-is; nothing retries.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Random(p) => p.embed(text).await,
            EmbeddingInner::Hash(p) => p.embed(text).await,
            EmbeddingInner::Rig(adapter) => {
                let vecs = adapter
                    .embed_text(text.to_string())
                    .await
                    .map_err(LedgerError::Embedding)?;
                vecs.into_iter()
                    .next()
                    .map(|v| v.into_iter().map(|x| x as f32).collect())
                    .ok_or_else(|| LedgerError::Embedding("empty embedding result".into()))
            }
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_id(&self) -> &str {
        match &self.inner {
            EmbeddingInner::Rig(adapter) => adapter.model_id(),
            EmbeddingInner::Hash(p) => p.model_id(),
            EmbeddingInner::Random(p) => p.model_id(),
        }
    }

    /// Provider name for display purposes.
    pub fn provider_name(&self) -> &str {
        self.provider
    }
}
