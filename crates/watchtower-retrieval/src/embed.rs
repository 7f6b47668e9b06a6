use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{info, warn};

use watchtower_core::types::Event;

use crate::error::{RetrievalError, Result};

/// Sentence-embedding backend for the semantic index.
///
/// Implementations are CPU-bound and synchronous; the engine runs them on the
/// blocking worker pool. The trait also keeps the engine testable without
/// downloading ONNX models.
pub trait Embedder: Send + Sync {
    /// Vector dimensionality (384 for the MiniLM family).
    fn dim(&self) -> usize;

    /// Encode a batch of texts. One output vector per input, in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batch size for encoding — tuned for commodity CPUs.
const EMBED_BATCH: usize = 256;

/// Local ONNX sentence embeddings via fastembed.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    dim: usize,
}

impl FastEmbedder {
    /// Load the configured model. Downloads the ONNX weights on first use;
    /// failure here puts the retriever into keyword-only mode.
    pub fn load(model_name: &str, dim: usize) -> Result<Self> {
        let model = match model_name {
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
            other => {
                warn!(model = other, "unknown embedding model, using all-MiniLM-L6-v2");
                EmbeddingModel::AllMiniLML6V2
            }
        };

        let embedding = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        info!(model = model_name, dim, "embedding model loaded");
        Ok(Self {
            model: Mutex::new(embedding),
            dim,
        })
    }
}

impl Embedder for FastEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self.model.lock().unwrap();
        let docs: Vec<&str> = texts.iter().map(String::as_str).collect();
        model
            .embed(docs, Some(EMBED_BATCH))
            .map_err(|e| RetrievalError::Embedding(e.to_string()))
    }
}

/// Text surrogate an event is embedded (and keyword-matched) under:
/// description, raw log, agent, and location, whitespace-collapsed and
/// lowercased.
pub fn event_surrogate(event: &Event) -> String {
    let combined = format!(
        "{} {} {} {}",
        event.rule_description, event.full_log, event.agent_name, event.location
    );
    combined
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
