//! Embedding model abstraction.
//!
//! The explorer never computes embeddings itself. It hands image paths to an
//! [`Embedder`] and stores whatever vectors come back. A deterministic
//! [`MockEmbedder`] is provided for tests.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ExplorerError, Result};

/// A model that turns images into fixed-width vectors.
pub trait Embedder: Send + Sync {
    /// Model name, for logging.
    fn name(&self) -> &str;

    /// Embed each image, returning one vector per path in input order.
    fn embed(&self, images: &[PathBuf]) -> Result<Vec<Vec<f32>>>;
}

/// Thread-safe shared embedder.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Embed a single image.
pub fn embed_one(embedder: &dyn Embedder, image: &Path) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[image.to_path_buf()])?;
    if vectors.len() != 1 {
        return Err(ExplorerError::Embedding(format!(
            "{} returned {} embeddings for one image",
            embedder.name(),
            vectors.len()
        )));
    }
    Ok(vectors.remove(0))
}

/// Deterministic embedder for tests.
///
/// Paths registered with [`MockEmbedder::with_vector`] return that vector;
/// any other path gets a pseudo-random vector derived from the path text.
pub struct MockEmbedder {
    name: String,
    dim: usize,
    fixed: HashMap<PathBuf, Vec<f32>>,
    calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl MockEmbedder {
    /// Create a mock producing `dim`-wide vectors.
    pub fn new(dim: usize) -> Self {
        Self {
            name: "mock".to_string(),
            dim,
            fixed: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` whenever `path` is embedded.
    pub fn with_vector(mut self, path: impl Into<PathBuf>, vector: Vec<f32>) -> Self {
        self.fixed.insert(path.into(), vector);
        self
    }

    /// Every `embed` call made so far.
    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `embed` calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Total number of images embedded across all calls.
    pub fn embedded_count(&self) -> usize {
        self.calls.lock().unwrap().iter().map(Vec::len).sum()
    }

    fn vector_for(&self, path: &Path) -> Vec<f32> {
        if let Some(v) = self.fixed.get(path) {
            return v.clone();
        }

        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        (0..self.dim).map(|_| rng.random::<f32>()).collect()
    }
}

impl Embedder for MockEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, images: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().unwrap().push(images.to_vec());
        Ok(images.iter().map(|p| self.vector_for(p)).collect())
    }
}
