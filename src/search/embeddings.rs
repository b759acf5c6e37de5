//! Query embedding using ONNX Runtime.
//!
//! The model is loaded lazily, at most once per session, by [`QueryEmbedder`].
//! Concurrent callers that arrive while a load is in flight wait on the same
//! load and share the resulting model handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::input::SessionInputValue;
use ort::session::Session;
use ort::value::Value;
use serde::Serialize;
use tokenizers::Tokenizer;
use tokio::sync::{broadcast, watch};

use crate::error::{Error, Result};
use crate::models::{ensure_model_files, ModelSource};
use crate::search::similarity::l2_normalize;

const MAX_SEQ_LENGTH: usize = 256;

/// Default upper bound on model download plus initialization
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// A loaded text embedding backend
pub trait Embedder: Send {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Produces an [`Embedder`]. Called at most once per [`QueryEmbedder`], on a
/// blocking thread.
pub trait ModelLoader: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn load(&self, progress: &ProgressSink) -> Result<Box<dyn Embedder>>;
}

/// Model lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModelEvent {
    LoadStarted { model: String },
    Downloading { file: String },
    Loaded { dimension: usize },
    LoadFailed { reason: String },
}

/// Sending half of the model event stream
#[derive(Debug, Clone)]
pub struct ProgressSink(broadcast::Sender<ModelEvent>);

impl ProgressSink {
    pub fn emit(&self, event: ModelEvent) {
        // No subscribers is fine
        let _ = self.0.send(event);
    }
}

/// Shared handle to a ready model
pub type SharedEmbedder = Arc<Mutex<Box<dyn Embedder>>>;

type LoadResult = std::result::Result<SharedEmbedder, String>;

enum LoadState {
    Unloaded,
    Loading(watch::Receiver<Option<LoadResult>>),
    Ready { model: SharedEmbedder, dimension: usize },
    Failed(String),
}

/// Externally visible model state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready { dimension: usize },
    Failed { reason: String },
}

/// Session-scoped query embedding service
pub struct QueryEmbedder {
    loader: Arc<dyn ModelLoader>,
    state: Arc<Mutex<LoadState>>,
    progress: ProgressSink,
    load_timeout: Duration,
}

impl QueryEmbedder {
    pub fn new(loader: impl ModelLoader) -> Self {
        Self::with_timeout(loader, DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_timeout(loader: impl ModelLoader, load_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(LoadState::Unloaded)),
            progress: ProgressSink(tx),
            load_timeout,
        }
    }

    /// Subscribe to model lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.progress.0.subscribe()
    }

    pub fn model_name(&self) -> &str {
        self.loader.name()
    }

    pub fn status(&self) -> ModelStatus {
        let Ok(state) = self.state.lock() else {
            return ModelStatus::Failed {
                reason: "model state lock poisoned".to_string(),
            };
        };
        match &*state {
            LoadState::Unloaded => ModelStatus::Unloaded,
            LoadState::Loading(_) => ModelStatus::Loading,
            LoadState::Ready { dimension, .. } => ModelStatus::Ready {
                dimension: *dimension,
            },
            LoadState::Failed(reason) => ModelStatus::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// Get the model, starting the load if nobody has yet.
    ///
    /// A failed load is remembered: later calls fail immediately.
    pub async fn acquire(&self) -> Result<SharedEmbedder> {
        let mut rx = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| Error::ModelUnavailable(format!("model state lock poisoned: {}", e)))?;
            match &*state {
                LoadState::Ready { model, .. } => return Ok(Arc::clone(model)),
                LoadState::Failed(reason) => return Err(Error::ModelUnavailable(reason.clone())),
                LoadState::Loading(rx) => rx.clone(),
                LoadState::Unloaded => {
                    let (tx, rx) = watch::channel(None);
                    *state = LoadState::Loading(rx.clone());
                    self.spawn_load(tx);
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::ModelUnavailable("model loader exited unexpectedly".to_string()))?
            .clone();

        match outcome {
            Some(Ok(model)) => Ok(model),
            Some(Err(reason)) => Err(Error::ModelUnavailable(reason)),
            None => Err(Error::ModelUnavailable("model load produced no result".to_string())),
        }
    }

    fn spawn_load(&self, tx: watch::Sender<Option<LoadResult>>) {
        let loader = Arc::clone(&self.loader);
        let state = Arc::clone(&self.state);
        let progress = self.progress.clone();
        let timeout = self.load_timeout;

        tokio::spawn(async move {
            tracing::info!("Loading embedding model {}", loader.name());
            progress.emit(ModelEvent::LoadStarted {
                model: loader.name().to_string(),
            });

            let task = tokio::task::spawn_blocking({
                let progress = progress.clone();
                move || loader.load(&progress)
            });

            let result = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(Ok(model))) => {
                    let dimension = model.dimension();
                    Ok((Arc::new(Mutex::new(model)), dimension))
                }
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(e)) => Err(format!("model loader panicked: {}", e)),
                Err(_) => Err(format!("model load timed out after {:?}", timeout)),
            };

            match &result {
                Ok((_, dimension)) => {
                    let dimension = *dimension;
                    tracing::info!("Embedding model loaded ({} dimensions)", dimension);
                    progress.emit(ModelEvent::Loaded { dimension });
                }
                Err(reason) => {
                    tracing::warn!("Embedding model unavailable: {}. Falling back to lexical search.", reason);
                    progress.emit(ModelEvent::LoadFailed {
                        reason: reason.clone(),
                    });
                }
            }

            if let Ok(mut guard) = state.lock() {
                *guard = match &result {
                    Ok((model, dimension)) => LoadState::Ready {
                        model: Arc::clone(model),
                        dimension: *dimension,
                    },
                    Err(reason) => LoadState::Failed(reason.clone()),
                };
            }
            let result: LoadResult = result.map(|(model, _)| model);
            let _ = tx.send(Some(result));
        });
    }

    /// Embed a query. The returned vector is L2-normalized.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidQuery("query is empty".to_string()));
        }

        let model = self.acquire().await?;
        let text = text.to_string();

        let mut embedding = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| Error::ModelUnavailable(format!("model lock poisoned: {}", e)))?;
            guard.embed(&text)
        })
        .await
        .map_err(|e| Error::InvalidQueryEmbedding(format!("embedding task failed: {}", e)))?
        .map_err(|e| match e {
            Error::ModelUnavailable(_) | Error::InvalidQueryEmbedding(_) => e,
            other => Error::InvalidQueryEmbedding(other.to_string()),
        })?;

        if embedding.is_empty() {
            return Err(Error::InvalidQueryEmbedding("model returned an empty vector".to_string()));
        }
        if !l2_normalize(&mut embedding) {
            return Err(Error::InvalidQueryEmbedding(
                "model returned a zero or non-finite vector".to_string(),
            ));
        }
        Ok(embedding)
    }
}

/// Loads an ONNX sentence-embedding model, downloading it on first use
pub struct OnnxModelLoader {
    models_dir: PathBuf,
    source: &'static ModelSource,
}

impl OnnxModelLoader {
    pub fn new(models_dir: impl Into<PathBuf>, source: &'static ModelSource) -> Self {
        Self {
            models_dir: models_dir.into(),
            source,
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn name(&self) -> &str {
        self.source.id
    }

    fn load(&self, progress: &ProgressSink) -> Result<Box<dyn Embedder>> {
        let dir = ensure_model_files(self.source, &self.models_dir, |file| {
            progress.emit(ModelEvent::Downloading { file: file.to_string() });
        })?;
        Ok(Box::new(OnnxEmbedder::load(&dir, self.source.dimension)?))
    }
}

/// ONNX Runtime session plus its tokenizer
pub struct OnnxEmbedder {
    session: Session,
    tokenizer: Tokenizer,
    dimension: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`
    pub fn load(model_dir: &Path, dimension: usize) -> Result<Self> {
        tracing::info!("Loading embedding model from {:?}", model_dir);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_dir.join("model.onnx"))?;

        let tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| Error::Other(format!("Failed to load tokenizer: {}", e)))?;

        Ok(Self {
            session,
            tokenizer,
            dimension,
        })
    }

    /// Generate mean-pooled, L2-normalized embeddings for a batch of texts
    pub fn embed_batch(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Other(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(MAX_SEQ_LENGTH))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids: Vec<i64> = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask: Vec<i64> = Vec::with_capacity(batch_size * seq_len);
        let mut token_type_ids: Vec<i64> = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let len = ids.len().min(seq_len);

            for i in 0..seq_len {
                if i < len {
                    input_ids.push(ids[i] as i64);
                    attention_mask.push(mask[i] as i64);
                    token_type_ids.push(types[i] as i64);
                } else {
                    input_ids.push(0);
                    attention_mask.push(0);
                    token_type_ids.push(0);
                }
            }
        }

        let shape = (batch_size, seq_len);
        let input_ids_array = ndarray::Array2::from_shape_vec(shape, input_ids)
            .map_err(|e| Error::Other(format!("Failed to create input array: {}", e)))?;
        let attention_mask_array = ndarray::Array2::from_shape_vec(shape, attention_mask.clone())
            .map_err(|e| Error::Other(format!("Failed to create mask array: {}", e)))?;
        let token_type_ids_array = ndarray::Array2::from_shape_vec(shape, token_type_ids)
            .map_err(|e| Error::Other(format!("Failed to create type array: {}", e)))?;

        let outputs = self.session.run(vec![
            ("input_ids", SessionInputValue::from(Value::from_array(input_ids_array)?)),
            ("attention_mask", SessionInputValue::from(Value::from_array(attention_mask_array)?)),
            ("token_type_ids", SessionInputValue::from(Value::from_array(token_type_ids_array)?)),
        ])?;

        // last_hidden_state: [batch_size, seq_len, hidden_size]
        let (out_shape, output_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Other(format!("Failed to extract output: {}", e)))?;

        if out_shape.len() != 3 {
            return Err(Error::InvalidQueryEmbedding(format!(
                "unexpected model output rank {}",
                out_shape.len()
            )));
        }
        let out_seq_len = out_shape[1] as usize;
        let hidden_size = out_shape[2] as usize;
        if hidden_size == 0 || out_seq_len == 0 {
            return Err(Error::InvalidQueryEmbedding(format!(
                "model returned an empty hidden state of shape {:?}",
                out_shape
            )));
        }
        if output_data.len() < batch_size * out_seq_len * hidden_size {
            return Err(Error::InvalidQueryEmbedding(format!(
                "model output holds {} values, expected {}",
                output_data.len(),
                batch_size * out_seq_len * hidden_size
            )));
        }

        let mut embeddings = Vec::with_capacity(batch_size);
        for batch_idx in 0..batch_size {
            let mask = &attention_mask[batch_idx * seq_len..(batch_idx + 1) * seq_len];
            embeddings.push(mean_pool(
                &output_data[batch_idx * out_seq_len * hidden_size..(batch_idx + 1) * out_seq_len * hidden_size],
                mask,
                hidden_size,
            ));
        }

        Ok(embeddings)
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidQueryEmbedding("model returned no embedding".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Average the token vectors selected by `mask`, then L2-normalize.
///
/// `hidden` holds one row of `hidden_size` floats per token.
fn mean_pool(hidden: &[f32], mask: &[i64], hidden_size: usize) -> Vec<f32> {
    if hidden_size == 0 {
        return Vec::new();
    }
    let mut embedding = vec![0.0f32; hidden_size];
    let mut count = 0usize;

    for (token, row) in hidden.chunks_exact(hidden_size).enumerate() {
        if mask.get(token).copied().unwrap_or(0) == 0 {
            continue;
        }
        for (acc, val) in embedding.iter_mut().zip(row) {
            *acc += val;
        }
        count += 1;
    }

    if count > 0 {
        for val in &mut embedding {
            *val /= count as f32;
        }
    }
    l2_normalize(&mut embedding);
    embedding
}
