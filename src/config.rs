use std::path::PathBuf;
use std::time::Duration;

use crate::search::embeddings::DEFAULT_LOAD_TIMEOUT;
use crate::search::session::DEFAULT_DEBOUNCE;

/// Runtime settings, read from `ICON_SEARCH_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub models_dir: PathBuf,
    /// Embedding model id; defaults to the one recorded in the catalog
    pub model: Option<String>,
    /// Overrides the catalog's declared embedding dimension
    pub dimension: Option<usize>,
    pub debounce: Duration,
    pub model_load_timeout: Duration,
    /// When false, every query is answered lexically
    pub semantic: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = get("ICON_SEARCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        let catalog_path = get("ICON_SEARCH_CATALOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("icons.db"));
        let models_dir = get("ICON_SEARCH_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));

        let debounce = parse_number(&get, "ICON_SEARCH_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEBOUNCE);
        let model_load_timeout = parse_number(&get, "ICON_SEARCH_MODEL_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOAD_TIMEOUT);
        let dimension = parse_number(&get, "ICON_SEARCH_DIMENSION")
            .filter(|d| *d > 0)
            .map(|d| d as usize);

        let semantic = !get("ICON_SEARCH_DISABLE_MODEL")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"));

        Self {
            catalog_path,
            models_dir,
            model: get("ICON_SEARCH_MODEL"),
            dimension,
            debounce,
            model_load_timeout,
            semantic,
        }
    }
}

fn parse_number(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, using the default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.catalog_path, PathBuf::from("data/icons.db"));
        assert_eq!(config.models_dir, PathBuf::from("data/models"));
        assert_eq!(config.model, None);
        assert_eq!(config.dimension, None);
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.model_load_timeout, Duration::from_secs(60));
        assert!(config.semantic);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ICON_SEARCH_DATA_DIR", "/srv/icons"),
            ("ICON_SEARCH_MODEL", "all-MiniLM-L6-v2"),
            ("ICON_SEARCH_DIMENSION", "384"),
            ("ICON_SEARCH_DEBOUNCE_MS", "0"),
            ("ICON_SEARCH_MODEL_TIMEOUT_SECS", "5"),
            ("ICON_SEARCH_DISABLE_MODEL", "true"),
        ]);
        assert_eq!(config.catalog_path, PathBuf::from("/srv/icons/icons.db"));
        assert_eq!(config.models_dir, PathBuf::from("/srv/icons/models"));
        assert_eq!(config.model.as_deref(), Some("all-MiniLM-L6-v2"));
        assert_eq!(config.dimension, Some(384));
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.model_load_timeout, Duration::from_secs(5));
        assert!(!config.semantic);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = config(&[
            ("ICON_SEARCH_CATALOG", "icons.sqlite"),
            ("ICON_SEARCH_DEBOUNCE_MS", "soon"),
            ("ICON_SEARCH_MODEL_TIMEOUT_SECS", "0"),
            ("ICON_SEARCH_DIMENSION", "-1"),
        ]);
        assert_eq!(config.catalog_path, PathBuf::from("icons.sqlite"));
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.model_load_timeout, Duration::from_secs(60));
        assert_eq!(config.dimension, None);
    }
}
