//! HTTP embedding service client.
//!
//! Talks to a model server that accepts image paths and returns one vector
//! per image:
//!
//! ```text
//! POST {base_url}/embed
//! {"model": "yolov8n.pt", "images": ["/data/images/a.jpg"]}
//!
//! 200 OK
//! {"embeddings": [[0.12, 0.03, ...]]}
//! ```

use std::path::PathBuf;

use reqwest::blocking::Client;
use reqwest::header;
use serde::{Deserialize, Serialize};

use crate::embedder::Embedder;
use crate::error::{ExplorerError, Result};

/// Default embedding service URL.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8765";

/// Default model reference.
pub const DEFAULT_MODEL: &str = "yolov8n.pt";

/// Configuration for the HTTP embedder.
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// Base URL of the embedding service.
    pub base_url: String,
    /// Model the service should embed with.
    pub model: String,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl HttpEmbedderConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Blocking client for an embedding service.
pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    /// Create a new embedder with the given configuration.
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        let client = Client::builder().build().map_err(|e| {
            ExplorerError::Embedding(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client, config })
    }

    /// Build the embed endpoint URL.
    fn embed_url(&self) -> String {
        format!("{}/embed", self.config.base_url.trim_end_matches('/'))
    }

    fn to_request<'a>(&'a self, images: &[PathBuf]) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.config.model,
            images: images
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        }
    }
}

impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn embed(&self, images: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let request = self.to_request(images);

        tracing::debug!(
            model = %self.config.model,
            images = images.len(),
            "Embedding request"
        );

        let response = self
            .client
            .post(self.embed_url())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .map_err(|e| ExplorerError::Embedding(format!("Embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExplorerError::Embedding(format!(
                "Embedding service error ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| ExplorerError::Serialization(format!("Failed to parse response: {}", e)))?;

        if parsed.embeddings.len() != images.len() {
            return Err(ExplorerError::Embedding(format!(
                "Embedding service returned {} vectors for {} images",
                parsed.embeddings.len(),
                images.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpEmbedderConfig::new();
        assert_eq!(config.base_url, "http://localhost:8765");
        assert_eq!(config.model, "yolov8n.pt");
    }

    #[test]
    fn test_config_builder_and_url() {
        let config = HttpEmbedderConfig::new()
            .with_model("yolov8s.pt")
            .with_base_url("http://10.0.0.2:9000/");
        let embedder = HttpEmbedder::new(config).unwrap();

        assert_eq!(embedder.name(), "yolov8s.pt");
        assert_eq!(embedder.embed_url(), "http://10.0.0.2:9000/embed");
    }

    #[test]
    fn test_request_wire_format() {
        let embedder = HttpEmbedder::new(HttpEmbedderConfig::new()).unwrap();
        let request = embedder.to_request(&[PathBuf::from("/d/images/a.jpg")]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "yolov8n.pt", "images": ["/d/images/a.jpg"]})
        );

        let response: EmbedResponse =
            serde_json::from_str(r#"{"embeddings": [[0.5, 1.0]]}"#).unwrap();
        assert_eq!(response.embeddings, vec![vec![0.5, 1.0]]);
    }
}
