//! Configuration file support for sightline.
//!
//! Project data lives in a `.sightline/` directory:
//! - `.sightline/config.toml` - Configuration file
//! - `.sightline/logs/` - Log files for long-running commands
//!
//! Config discovery searches for `.sightline/config.toml` starting from the
//! current directory and walking up to parent directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sightline_docs::DEFAULT_SECTIONS;
use sightline_explorer::{
    DEFAULT_MAX_DIST, DEFAULT_MODEL, DEFAULT_SERVICE_URL, DEFAULT_SPLIT, DEFAULT_URI,
};

/// The sightline data directory name.
pub const SIGHTLINE_DIR: &str = ".sightline";
/// The config file name within the sightline directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Config docs table settings.
    pub docs: DocsConfig,
    /// Dataset and store settings.
    pub explorer: ExplorerConfig,
    /// Embedding service settings.
    pub embedder: EmbedderConfig,
    /// Similarity index settings.
    pub similarity: SimilarityConfig,
}

/// Config docs table configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Annotated defaults file to document.
    pub config_path: PathBuf,
    /// Section titles to document.
    pub sections: Vec<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("cfg/default.yaml"),
            sections: DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Dataset and store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Dataset descriptor YAML.
    pub data: Option<PathBuf>,
    /// Store directory, or ":memory:".
    pub uri: String,
    /// Split to embed.
    pub split: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            data: None,
            uri: DEFAULT_URI.to_string(),
            split: DEFAULT_SPLIT.to_string(),
        }
    }
}

/// Embedding service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Service base URL.
    pub base_url: String,
    /// Model the service embeds with.
    pub model: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Similarity index configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Maximum squared L2 distance for two images to count as similar.
    pub max_dist: f64,
    /// Fraction of the table searched per image (all rows when unset).
    pub top_k: Option<f64>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            max_dist: DEFAULT_MAX_DIST,
            top_k: None,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Looks for `.sightline/config.toml` in the directory and its parents.
    /// Returns the config and the `.sightline` directory it was found in.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let sightline_dir = dir.join(SIGHTLINE_DIR);
            let config_path = sightline_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, sightline_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve a path relative to the project root (the parent of `.sightline/`).
    pub fn resolve_path(path: &Path, sightline_dir: Option<&Path>) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match sightline_dir.and_then(Path::parent) {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.similarity.max_dist < 0.0 || self.similarity.max_dist.is_nan() {
            errors.push(ConfigValidationError {
                field: "similarity.max_dist".to_string(),
                message: format!(
                    "max_dist must be non-negative. Got {}.",
                    self.similarity.max_dist
                ),
            });
        }

        if let Some(top_k) = self.similarity.top_k {
            if !(0.0..=1.0).contains(&top_k) {
                errors.push(ConfigValidationError {
                    field: "similarity.top_k".to_string(),
                    message: format!("top_k must be between 0.0 and 1.0. Got {}.", top_k),
                });
            }
        }

        if self.embedder.model.is_empty() {
            errors.push(ConfigValidationError {
                field: "embedder.model".to_string(),
                message: "Embedding model cannot be empty.".to_string(),
            });
        }

        if !self.embedder.base_url.starts_with("http://")
            && !self.embedder.base_url.starts_with("https://")
        {
            errors.push(ConfigValidationError {
                field: "embedder.base_url".to_string(),
                message: format!(
                    "Invalid base URL '{}'. Expected an http:// or https:// URL.",
                    self.embedder.base_url
                ),
            });
        }

        if self.explorer.uri.is_empty() {
            errors.push(ConfigValidationError {
                field: "explorer.uri".to_string(),
                message: "Store URI cannot be empty.".to_string(),
            });
        }

        if self.explorer.split.is_empty() {
            errors.push(ConfigValidationError {
                field: "explorer.split".to_string(),
                message: "Split cannot be empty.".to_string(),
            });
        }

        errors
    }
}

/// Commented default configuration written by `sightline init`.
pub const DEFAULT_CONFIG: &str = r#"# sightline configuration
# Relative paths resolve against the directory containing .sightline/

[docs]
config_path = "cfg/default.yaml"  # Annotated defaults file to document
# sections = ["Train settings", "Hyperparameters"]  # Defaults to the standard set

[explorer]
# data = "datasets/coco8.yaml"  # Dataset descriptor
uri = "~/sightline/explorer"  # Store directory, or ":memory:"
split = "train"

[embedder]
base_url = "http://localhost:8765"  # Embedding service
model = "yolov8n.pt"

[similarity]
max_dist = 0.2  # Squared L2 distance threshold
# top_k = 0.1  # Fraction of rows searched per image
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.docs.config_path, PathBuf::from("cfg/default.yaml"));
        assert_eq!(config.docs.sections.len(), 13);
        assert_eq!(config.explorer.split, "train");
        assert_eq!(config.explorer.uri, "~/sightline/explorer");
        assert_eq!(config.embedder.model, "yolov8n.pt");
        assert_eq!(config.similarity.max_dist, 0.2);
        assert!(config.similarity.top_k.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[explorer]
data = "coco8.yaml"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.explorer.data, Some(PathBuf::from("coco8.yaml")));
        // Defaults should still apply
        assert_eq!(config.explorer.split, "train");
        assert_eq!(config.embedder.base_url, "http://localhost:8765");
    }

    #[test]
    fn test_default_file_matches_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        let default = Config::default();
        assert_eq!(config.docs.config_path, default.docs.config_path);
        assert_eq!(config.docs.sections, default.docs.sections);
        assert_eq!(config.explorer.uri, default.explorer.uri);
        assert_eq!(config.embedder.model, default.embedder.model);
        assert_eq!(config.similarity.max_dist, default.similarity.max_dist);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_find_and_load_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let sightline_dir = dir.path().join(SIGHTLINE_DIR);
        std::fs::create_dir_all(&sightline_dir).unwrap();
        std::fs::write(
            sightline_dir.join(CONFIG_FILE),
            "[similarity]\nmax_dist = 0.5\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, found) = Config::find_and_load_from(&nested).unwrap().unwrap();
        assert_eq!(config.similarity.max_dist, 0.5);
        assert_eq!(found, sightline_dir);
    }

    #[test]
    fn test_resolve_path() {
        let dir = PathBuf::from("/project/.sightline");
        assert_eq!(
            Config::resolve_path(Path::new("cfg/default.yaml"), Some(&dir)),
            PathBuf::from("/project/cfg/default.yaml")
        );
        assert_eq!(
            Config::resolve_path(Path::new("/abs/data.yaml"), Some(&dir)),
            PathBuf::from("/abs/data.yaml")
        );
        assert_eq!(
            Config::resolve_path(Path::new("data.yaml"), None),
            PathBuf::from("data.yaml")
        );
    }

    #[test]
    fn test_validate_similarity() {
        let mut config = Config::default();
        config.similarity.max_dist = -0.1;
        config.similarity.top_k = Some(1.5);

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "similarity.max_dist"));
        assert!(errors.iter().any(|e| e.field == "similarity.top_k"));
    }

    #[test]
    fn test_validate_embedder() {
        let mut config = Config::default();
        config.embedder.model = String::new();
        config.embedder.base_url = "localhost:8765".to_string();

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "embedder.model"));
        assert!(errors.iter().any(|e| e.field == "embedder.base_url"));
    }
}
