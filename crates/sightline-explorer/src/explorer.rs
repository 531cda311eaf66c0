//! The explorer: builds an embeddings table for a dataset split and answers
//! similarity, filter, and near-duplicate queries against it.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::dataset::{DatasetInfo, ImageLabels, sanitize_labels};
use crate::embedder::{SharedEmbedder, embed_one};
use crate::error::{ExplorerError, Result};
use crate::input::{ImageInput, NormalizedInput, mean_vector};
use crate::records::{EmbeddingRecord, ResultTable, SimIndexRecord, SimilarityIndex};
use crate::store::{TableHandle, VectorStore};

/// Default store location.
pub const DEFAULT_URI: &str = "~/sightline/explorer";

/// Default dataset split to embed.
pub const DEFAULT_SPLIT: &str = "train";

/// Default number of rows returned by similarity queries.
pub const DEFAULT_LIMIT: usize = 25;

/// Default distance threshold for the similarity index.
pub const DEFAULT_MAX_DIST: f64 = 0.2;

/// Table name used when no dataset is configured.
pub const DEFAULT_TABLE_NAME: &str = "explorer";

static SELECT_WHERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\b.*?\bwhere\b(.*)$").expect("static regex is valid")
});

static SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*select\b").expect("static regex is valid"));

/// Embedding explorer for one dataset.
///
/// Starts without a table. [`Explorer::create_embeddings_table`] builds or
/// reopens it, after which the query operations become available.
pub struct Explorer {
    store: VectorStore,
    embedder: SharedEmbedder,
    data: Option<PathBuf>,
    table_name: String,
    sim_idx_table_name: String,
    table: Option<TableHandle>,
    sim_index: Option<SimilarityIndex>,
}

impl Explorer {
    /// Create an explorer over the dataset descriptor `data`, storing tables under `uri`.
    pub fn new(data: Option<PathBuf>, embedder: SharedEmbedder, uri: &str) -> Result<Self> {
        let store = VectorStore::connect(uri)?;
        let table_name = data
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string());

        tracing::debug!(
            table = %table_name,
            store = %store.location(),
            model = %embedder.name(),
            "Created explorer"
        );

        Ok(Self {
            store,
            embedder,
            data,
            sim_idx_table_name: format!("{}_sim_idx", table_name),
            table_name,
            table: None,
            sim_index: None,
        })
    }

    /// Use a table name other than the dataset file stem.
    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self.sim_idx_table_name = format!("{}_sim_idx", self.table_name);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn sim_idx_table_name(&self) -> &str {
        &self.sim_idx_table_name
    }

    pub fn data(&self) -> Option<&Path> {
        self.data.as_deref()
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// True once a table has been created or reopened.
    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Number of rows in the embeddings table.
    pub fn table_len(&self) -> Result<usize> {
        let table = self.table()?;
        self.store.count(table)
    }

    fn table(&self) -> Result<&TableHandle> {
        self.table.as_ref().ok_or_else(ExplorerError::no_table)
    }

    /// Build the embeddings table for `split`, or reuse an existing one.
    ///
    /// Without `force`, a loaded table is kept as is and a persisted table of
    /// the same name is reopened. Otherwise every image of the split is
    /// embedded in one pass. A failure part way through leaves the persisted
    /// table partially populated.
    pub fn create_embeddings_table(&mut self, force: bool, split: &str) -> Result<()> {
        if self.table.is_some() && !force {
            tracing::info!("Table already exists. Reusing it. Pass force=true to overwrite it.");
            return Ok(());
        }
        if !force && self.store.has_table(&self.table_name)? {
            tracing::info!(
                "Table {} already exists. Reusing it. Pass force=true to overwrite it.",
                self.table_name
            );
            self.table = Some(self.store.open_table(&self.table_name)?);
            return Ok(());
        }
        let Some(data) = self.data.as_deref() else {
            return Err(ExplorerError::Config(
                "Data must be provided to create embeddings table".to_string(),
            ));
        };

        let info = DatasetInfo::load(data)?;
        let images = info.image_files(split)?;

        let first = &images[0];
        if !first.exists() {
            return Err(ExplorerError::ImageNotFound(first.clone()));
        }
        let dim = embed_one(self.embedder.as_ref(), first)?.len();
        if dim == 0 {
            return Err(ExplorerError::Embedding(format!(
                "{} returned an empty embedding",
                self.embedder.name()
            )));
        }

        self.table = None;
        self.sim_index = None;
        let table = self.store.create_embeddings_table(&self.table_name, dim)?;
        tracing::info!(
            table = %self.table_name,
            images = images.len(),
            dim,
            "Embedding split {}",
            split
        );

        for (i, image) in images.iter().enumerate() {
            if !image.exists() {
                return Err(ExplorerError::ImageNotFound(image.clone()));
            }
            let meta = sanitize_labels(ImageLabels::read_for(image)?, &info);
            let vector = embed_one(self.embedder.as_ref(), image)?;

            self.store.add(
                &table,
                &EmbeddingRecord {
                    idx: i as i64,
                    im_file: image.to_string_lossy().into_owned(),
                    meta,
                    vector,
                },
            )?;
            tracing::debug!(idx = i, image = %image.display(), "Embedded image");
        }

        tracing::info!(table = %self.table_name, rows = images.len(), "Embeddings table created");
        self.table = Some(table);
        Ok(())
    }

    /// Rows closest to the query images, ordered by ascending `_distance`.
    ///
    /// Several images are averaged into one query vector. Every image path
    /// must exist.
    pub fn query(&self, img: impl Into<ImageInput>, limit: usize) -> Result<ResultTable> {
        let table = self.table()?;

        let embeddings = match img.into().normalize()? {
            NormalizedInput::Paths(paths) => {
                if let Some(missing) = paths.iter().find(|p| !p.exists()) {
                    return Err(ExplorerError::ImageNotFound(missing.clone()));
                }
                self.embedder.embed(&paths)?
            }
            NormalizedInput::Vectors(vectors) => vectors,
        };
        let vector = mean_vector(&embeddings)?;

        self.store.search(table, &vector, limit)
    }

    /// Rows matching an SQL predicate.
    ///
    /// Takes either a bare predicate (`labels LIKE '%person%'`) or a full
    /// `SELECT * FROM table WHERE ...` statement.
    ///
    /// ```ignore
    /// let people = explorer.sql_query("SELECT * FROM table WHERE labels LIKE '%person%'")?;
    /// ```
    pub fn sql_query(&self, query: &str) -> Result<ResultTable> {
        let table = self.table()?;
        let predicate = extract_predicate(query);
        tracing::debug!(predicate = ?predicate, "SQL query");
        self.store.filter(table, predicate.as_deref())
    }

    /// Rows similar to the given images or to the images at the given table indexes.
    ///
    /// Exactly one of `img` and `idx` must be provided.
    pub fn get_similar(
        &self,
        img: Option<ImageInput>,
        idx: Option<Vec<usize>>,
        limit: usize,
    ) -> Result<ResultTable> {
        let img = self.resolve_imgs_or_idxs(img, idx)?;
        self.query(img, limit)
    }

    fn resolve_imgs_or_idxs(
        &self,
        img: Option<ImageInput>,
        idx: Option<Vec<usize>>,
    ) -> Result<ImageInput> {
        match (img, idx) {
            (Some(_), Some(_)) => Err(ExplorerError::Config(
                "Only one of img or idx must be provided".to_string(),
            )),
            (None, None) => Err(ExplorerError::Config(
                "Either img or idx must be provided".to_string(),
            )),
            (Some(img), None) => Ok(img),
            (None, Some(idx)) => {
                let table = self.table()?;
                let idx: Vec<i64> = idx.into_iter().map(|i| i as i64).collect();
                let rows = self.store.take(table, &idx)?;
                Ok(ImageInput::paths(rows.im_files()))
            }
        }
    }

    /// Near-duplicate index: for every row, the images within `max_dist`.
    ///
    /// `top_k` is the fraction of the table searched per row: all rows when
    /// `None`, at least one row otherwise, so `Some(0.0)` only finds the row
    /// itself. The result is cached and written to the `<table>_sim_idx`
    /// table; a cached index is returned unchanged unless `force` is set.
    pub fn similarity_index(
        &mut self,
        max_dist: f64,
        top_k: Option<f64>,
        force: bool,
    ) -> Result<SimilarityIndex> {
        let table = self.table()?.clone();

        if let Some(k) = top_k {
            if !(0.0..=1.0).contains(&k) {
                return Err(ExplorerError::InvalidInput(format!(
                    "top_k must be between 0.0 and 1.0. Got {}",
                    k
                )));
            }
        }
        if max_dist < 0.0 || max_dist.is_nan() {
            return Err(ExplorerError::InvalidInput(format!(
                "max_dist must be greater than 0. Got {}",
                max_dist
            )));
        }

        if !force {
            if let Some(index) = &self.sim_index {
                tracing::info!(
                    "Similarity index already exists. Reusing it. Pass force=true to overwrite it."
                );
                return Ok(index.clone());
            }
        }

        let rows = self.store.count(&table)?;
        let limit = neighbour_limit(top_k, rows);
        tracing::info!(
            table = %self.sim_idx_table_name,
            rows,
            limit,
            max_dist,
            "Building similarity index"
        );

        let vectors = self.store.vectors(&table)?;
        self.store.create_sim_index_table(&self.sim_idx_table_name)?;

        let mut records = Vec::with_capacity(vectors.len());
        for (idx, im_file, vector) in vectors {
            let neighbours = self.store.search(&table, &vector, limit)?;
            let sim_im_files: Vec<String> = neighbours
                .rows()
                .iter()
                .filter(|r| r.distance.is_some_and(|d| f64::from(d) <= max_dist))
                .map(|r| r.record.im_file.clone())
                .collect();

            let record = SimIndexRecord {
                idx,
                im_file,
                count: sim_im_files.len(),
                sim_im_files,
            };
            self.store.add_sim_record(&self.sim_idx_table_name, &record)?;
            tracing::debug!(idx, count = record.count, "Indexed image");
            records.push(record);
        }

        let index = SimilarityIndex::new(records);
        self.sim_index = Some(index.clone());
        Ok(index)
    }

    /// Per-row neighbour counts from [`Explorer::similarity_index`].
    pub fn similarity_counts(
        &mut self,
        max_dist: f64,
        top_k: Option<f64>,
        force: bool,
    ) -> Result<Vec<usize>> {
        Ok(self.similarity_index(max_dist, top_k, force)?.counts())
    }

    /// Image grids are not rendered; use the result rows with an external viewer.
    pub fn visualize(&self, _result: &ResultTable) -> Result<()> {
        Err(ExplorerError::NotSupported(
            "visualize is not supported; render im_file and bboxes from the result rows instead"
                .to_string(),
        ))
    }
}

/// Rows searched per image: `floor(top_k * rows)`, all rows without a
/// fraction, never fewer than one.
///
/// `Some(0.0)` is a fraction like any other and searches a single row. Pass
/// `None` to search the whole table.
fn neighbour_limit(top_k: Option<f64>, rows: usize) -> usize {
    let limit = match top_k {
        Some(k) => (k * rows as f64).floor() as usize,
        None => rows,
    };
    limit.max(1)
}

/// The filter part of a query: everything after the first `WHERE` of a
/// `SELECT` statement, or the whole text otherwise. `None` selects every row.
fn extract_predicate(query: &str) -> Option<String> {
    let query = query.trim().trim_end_matches(';');

    let predicate = if let Some(caps) = SELECT_WHERE.captures(query) {
        caps.get(1).map_or("", |m| m.as_str())
    } else if SELECT.is_match(query) {
        ""
    } else {
        query
    };

    let predicate = predicate.trim();
    (!predicate.is_empty()).then(|| predicate.to_string())
}
