use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::error::{RecollectError, Result};

/// Thread-safe handle to an in-process embedding model.
///
/// Vectors come back L2-normalised so callers can compare them with a plain
/// dot product.
#[derive(Clone)]
pub struct EmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl EmbeddingProvider {
    /// Load `model_name`, downloading it on first use. Accepts an optional
    /// `local/` prefix.
    pub fn new(model_name: &str) -> Result<Self> {
        let name = model_name.strip_prefix("local/").unwrap_or(model_name);
        let model = TextEmbedding::try_new(
            InitOptions::new(resolve_embedding_model(name)).with_show_download_progress(false),
        )
        .map_err(|e| RecollectError::Embedding(e.to_string()))?;

        tracing::info!(model = name, "Loaded local embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| RecollectError::Embedding(format!("Embedding model lock poisoned: {e}")))?;
        let embedding = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| RecollectError::Embedding(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| RecollectError::Embedding("No embedding generated".to_string()))?;
        Ok(normalize(embedding))
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

fn resolve_embedding_model(model_name: &str) -> EmbeddingModel {
    match model_name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            EmbeddingModel::AllMiniLML12V2
        }
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        _ => EmbeddingModel::AllMiniLML6V2,
    }
}
