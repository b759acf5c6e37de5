use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A sentence-embedding model the query embedder knows how to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// Unique identifier for the model (e.g., "bge-base-en-v1.5")
    pub id: &'static str,
    /// Hugging Face repository (org/repo)
    pub repo: &'static str,
    /// Path to the ONNX graph within the repo
    pub onnx_file: &'static str,
    /// Output embedding dimension
    pub dimension: usize,
}

impl ModelSource {
    /// Get the local directory for this model given a models directory
    pub fn model_dir(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.id)
    }

    pub fn model_url(&self) -> String {
        format!("https://huggingface.co/{}/resolve/main/{}", self.repo, self.onnx_file)
    }

    pub fn tokenizer_url(&self) -> String {
        format!("https://huggingface.co/{}/resolve/main/tokenizer.json", self.repo)
    }

    /// Whether `name` refers to this model, either by id or by repository
    fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        name.eq_ignore_ascii_case(self.id)
            || name.eq_ignore_ascii_case(self.repo)
            || name
                .rsplit('/')
                .next()
                .is_some_and(|tail| tail.eq_ignore_ascii_case(self.id))
    }
}

/// Model used by the icon pipeline when nothing else is specified
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// All supported embedding models
pub const MODEL_SOURCES: &[ModelSource] = &[
    ModelSource {
        id: "bge-base-en-v1.5",
        repo: "Xenova/bge-base-en-v1.5",
        onnx_file: "onnx/model_quantized.onnx",
        dimension: 768,
    },
    ModelSource {
        id: "all-MiniLM-L6-v2",
        repo: "sentence-transformers/all-MiniLM-L6-v2",
        onnx_file: "onnx/model.onnx",
        dimension: 384,
    },
];

/// Get a model by id or repository name (e.g. "Xenova/bge-base-en-v1.5")
pub fn get_model(name: &str) -> Option<&'static ModelSource> {
    MODEL_SOURCES.iter().find(|s| s.matches(name))
}

/// Pick the model for a session: explicit choice first, then the model the
/// catalog was embedded with, then the default.
pub fn resolve_model(configured: Option<&str>, catalog_model: Option<&str>) -> &'static ModelSource {
    for candidate in [configured, catalog_model].into_iter().flatten() {
        match get_model(candidate) {
            Some(source) => return source,
            None => tracing::warn!("Unknown embedding model '{}', ignoring", candidate),
        }
    }

    get_model(DEFAULT_MODEL).unwrap_or(&MODEL_SOURCES[0])
}

/// Download the model graph and tokenizer if they are not already on disk.
///
/// `on_download` is called with the file name before each download starts.
pub fn ensure_model_files(
    source: &ModelSource,
    models_dir: &Path,
    mut on_download: impl FnMut(&str),
) -> Result<PathBuf> {
    let dir = source.model_dir(models_dir);
    std::fs::create_dir_all(&dir)?;

    let model_path = dir.join("model.onnx");
    if !model_path.exists() {
        tracing::info!("Downloading {} from {}...", source.id, source.repo);
        on_download("model.onnx");
        download_file(&source.model_url(), &model_path)?;
    }

    let tokenizer_path = dir.join("tokenizer.json");
    if !tokenizer_path.exists() {
        on_download("tokenizer.json");
        download_file(&source.tokenizer_url(), &tokenizer_path)?;
    }

    Ok(dir)
}

/// Download a file from URL to disk, writing to a temporary name first so an
/// interrupted download never leaves a truncated model behind
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| Error::Other(format!("Failed to download {}: {}", url, e)))?;

    let partial = dest.with_extension("part");
    let mut reader = response.into_body().into_reader();
    let mut file = std::fs::File::create(&partial)?;
    std::io::copy(&mut reader, &mut file)?;
    std::fs::rename(&partial, dest)?;

    tracing::debug!("Downloaded {} to {:?}", url, dest);
    Ok(())
}
