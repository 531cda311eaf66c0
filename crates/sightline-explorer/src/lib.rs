//! sightline-explorer: dataset embedding exploration
//!
//! This crate embeds the images of a dataset split and stores them for
//! exploration:
//! - Dataset descriptors, image listing, and label sanitization
//! - Embedding models behind the `Embedder` trait (HTTP service, mock)
//! - SQLite-backed vector tables with nearest-neighbour search and SQL filters
//! - A near-duplicate similarity index

pub mod dataset;
pub mod embedder;
pub mod error;
pub mod explorer;
pub mod input;
pub mod records;
pub mod service;
pub mod store;

pub use dataset::{
    DatasetInfo, IMG_FORMATS, ImageLabels, LabelError, LabelMetadata, label_path, sanitize_labels,
};
pub use embedder::{Embedder, MockEmbedder, SharedEmbedder, embed_one};
pub use error::{ExplorerError, Result};
pub use explorer::{
    DEFAULT_LIMIT, DEFAULT_MAX_DIST, DEFAULT_SPLIT, DEFAULT_TABLE_NAME, DEFAULT_URI, Explorer,
};
pub use input::{ImageInput, NormalizedInput, mean_vector};
pub use records::{EmbeddingRecord, ResultRow, ResultTable, SimIndexRecord, SimilarityIndex};
pub use service::{DEFAULT_MODEL, DEFAULT_SERVICE_URL, HttpEmbedder, HttpEmbedderConfig};
pub use store::{DB_FILE, MEMORY_URI, TableHandle, VectorStore};
