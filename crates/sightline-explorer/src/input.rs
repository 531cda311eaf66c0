//! Query inputs.
//!
//! Queries accept a single image path, several paths, or precomputed
//! embedding vectors. Everything is normalized into [`NormalizedInput`] at
//! the boundary so the query path only deals with one shape.

use std::path::PathBuf;

use crate::error::{ExplorerError, Result};

/// Images or embeddings to search with.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageInput {
    SinglePath(PathBuf),
    PathList(Vec<PathBuf>),
    VectorList(Vec<Vec<f32>>),
}

/// Validated input: a non-empty list of paths, or a non-empty list of
/// vectors that all share one width.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedInput {
    Paths(Vec<PathBuf>),
    Vectors(Vec<Vec<f32>>),
}

impl ImageInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageInput::SinglePath(path.into())
    }

    pub fn paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ImageInput::PathList(paths.into_iter().map(Into::into).collect())
    }

    pub fn vectors(vectors: Vec<Vec<f32>>) -> Self {
        ImageInput::VectorList(vectors)
    }

    /// Validate and flatten into a uniform list form.
    pub fn normalize(self) -> Result<NormalizedInput> {
        match self {
            ImageInput::SinglePath(path) => Ok(NormalizedInput::Paths(vec![path])),
            ImageInput::PathList(paths) => {
                if paths.is_empty() {
                    return Err(ExplorerError::InvalidInput(
                        "img must contain at least one image path".to_string(),
                    ));
                }
                Ok(NormalizedInput::Paths(paths))
            }
            ImageInput::VectorList(vectors) => {
                let Some(first) = vectors.first() else {
                    return Err(ExplorerError::InvalidInput(
                        "img must contain at least one vector".to_string(),
                    ));
                };
                let width = first.len();
                if width == 0 {
                    return Err(ExplorerError::InvalidInput(
                        "embedding vectors must not be empty".to_string(),
                    ));
                }
                if let Some(bad) = vectors.iter().find(|v| v.len() != width) {
                    return Err(ExplorerError::InvalidInput(format!(
                        "embedding vectors must share one width: expected {}, got {}",
                        width,
                        bad.len()
                    )));
                }
                Ok(NormalizedInput::Vectors(vectors))
            }
        }
    }
}

impl From<&str> for ImageInput {
    fn from(path: &str) -> Self {
        ImageInput::SinglePath(PathBuf::from(path))
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        ImageInput::SinglePath(path)
    }
}

impl From<Vec<PathBuf>> for ImageInput {
    fn from(paths: Vec<PathBuf>) -> Self {
        ImageInput::PathList(paths)
    }
}

impl From<Vec<String>> for ImageInput {
    fn from(paths: Vec<String>) -> Self {
        ImageInput::paths(paths)
    }
}

impl From<Vec<Vec<f32>>> for ImageInput {
    fn from(vectors: Vec<Vec<f32>>) -> Self {
        ImageInput::VectorList(vectors)
    }
}

/// Elementwise arithmetic mean of equally sized vectors.
///
/// A single vector is returned unchanged.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(ExplorerError::InvalidInput(
            "cannot average zero embeddings".to_string(),
        ));
    };
    if vectors.len() == 1 {
        return Ok(first.clone());
    }

    let width = first.len();
    let mut sum = vec![0.0f64; width];
    for v in vectors {
        if v.len() != width {
            return Err(ExplorerError::Embedding(format!(
                "embeddings differ in width: {} vs {}",
                width,
                v.len()
            )));
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += f64::from(*x);
        }
    }

    let n = vectors.len() as f64;
    Ok(sum.into_iter().map(|s| (s / n) as f32).collect())
}
