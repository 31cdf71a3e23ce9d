//! Embedding generation with provider-sized batching.

use async_trait::async_trait;
use rig::client::EmbeddingsClient;
use rig::embeddings::EmbeddingModel;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::error::EmbeddingError;

/// Maximum number of texts sent to the provider in one request.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

/// A remote embedding backend. One call embeds one batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` with `model`, returning one vector per text in order.
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f64>>, EmbeddingError>;
}

/// Embed an arbitrary number of texts, splitting them into batches of
/// [`EMBEDDING_BATCH_SIZE`]. Output order matches input order. The first
/// failing batch aborts the whole call.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    model: &str,
) -> Result<Vec<Vec<f64>>, EmbeddingError> {
    let mut embeddings = Vec::with_capacity(texts.len());

    for (index, batch) in texts.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
        debug!(batch = index, size = batch.len(), model, "Embedding batch");
        let vectors = provider.embed(model, batch.to_vec()).await?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                got: vectors.len(),
            });
        }
        embeddings.extend(vectors);
    }

    Ok(embeddings)
}

/// OpenAI-compatible embeddings through rig-core.
pub struct RigEmbedder {
    client: rig::client::Client<rig::providers::openai::client::OpenAIResponsesExt>,
}

impl RigEmbedder {
    pub fn new(api_key: &secrecy::SecretString) -> Result<Self, EmbeddingError> {
        let client = rig::providers::openai::Client::new(api_key.expose_secret()).map_err(|e| {
            EmbeddingError::RequestFailed {
                provider: "openai".into(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EmbeddingProvider for RigEmbedder {
    async fn embed(&self, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        let embedding_model = self.client.embedding_model(model);
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| EmbeddingError::RequestFailed {
                provider: "openai".into(),
                reason: e.to_string(),
            })?;
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}
