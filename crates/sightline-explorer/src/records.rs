//! Row types returned by the explorer.
//!
//! Results are ordered rows. They convert to a columnar map (column name to
//! values) or serialize straight to JSON for tabular display.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::LabelMetadata;
use crate::error::Result;

/// One image in the embeddings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Row index, assigned in insertion order starting at 0.
    pub idx: i64,
    pub im_file: String,
    #[serde(flatten)]
    pub meta: LabelMetadata,
    pub vector: Vec<f32>,
}

/// A row of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(flatten)]
    pub record: EmbeddingRecord,
    /// Squared L2 distance to the query vector, for similarity searches.
    #[serde(
        rename = "_distance",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub distance: Option<f32>,
}

/// Ordered rows from a query, filter, or lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row-oriented view.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }

    /// Image paths in row order.
    pub fn im_files(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.record.im_file.as_str()).collect()
    }

    /// Distances in row order; `None` for rows that did not come from a search.
    pub fn distances(&self) -> Vec<Option<f32>> {
        self.rows.iter().map(|r| r.distance).collect()
    }

    /// Columnar view: column name to values in row order.
    pub fn to_columns(&self) -> Result<BTreeMap<String, Vec<Value>>> {
        columns_of(&self.rows)
    }
}

/// Neighbours of one image within the distance threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimIndexRecord {
    pub idx: i64,
    pub im_file: String,
    pub count: usize,
    pub sim_im_files: Vec<String>,
}

/// Per-image similarity counts for a whole table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SimilarityIndex {
    rows: Vec<SimIndexRecord>,
}

impl SimilarityIndex {
    pub fn new(rows: Vec<SimIndexRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[SimIndexRecord] {
        &self.rows
    }

    /// Neighbour count per row.
    pub fn counts(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.count).collect()
    }

    /// Columnar view: column name to values in row order.
    pub fn to_columns(&self) -> Result<BTreeMap<String, Vec<Value>>> {
        columns_of(&self.rows)
    }
}

fn columns_of<T: Serialize>(rows: &[T]) -> Result<BTreeMap<String, Vec<Value>>> {
    let mut columns: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in rows {
        if let Value::Object(fields) = serde_json::to_value(row)? {
            for (name, value) in fields {
                columns.entry(name).or_default().push(value);
            }
        }
    }
    Ok(columns)
}
