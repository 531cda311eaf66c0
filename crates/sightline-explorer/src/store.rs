//! Embedding table storage using SQLite.
//!
//! Each embedding table is a plain SQLite table with one row per image. Label
//! metadata is stored as JSON text so filters like
//! `labels LIKE '%person%'` work directly, and vectors are little-endian
//! `f32` blobs compared by the `l2_distance` SQL function registered on every
//! connection. A catalog table records the kind and vector width of every
//! table the store owns.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;

use crate::dataset::LabelMetadata;
use crate::error::{ExplorerError, Result};
use crate::records::{EmbeddingRecord, ResultRow, ResultTable, SimIndexRecord, SimilarityIndex};

/// URI that opens a store without touching the filesystem.
pub const MEMORY_URI: &str = ":memory:";

/// Database file created inside a store directory.
pub const DB_FILE: &str = "explorer.db";

const CATALOG: &str = "_sightline_tables";

const KIND_EMBEDDINGS: &str = "embeddings";
const KIND_SIM_INDEX: &str = "sim_index";

const RECORD_COLUMNS: &str = "idx, im_file, labels, cls, bboxes, segments, vector";

/// Handle to an embeddings table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    name: String,
    dim: usize,
}

impl TableHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width of the vectors stored in the table.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Persistent storage for embedding tables and similarity indexes.
pub struct VectorStore {
    conn: Connection,
    location: String,
}

impl VectorStore {
    /// Open or create a store.
    ///
    /// `uri` is a directory (a leading `~` expands to the home directory)
    /// that will hold the database file, or [`MEMORY_URI`].
    pub fn connect(uri: &str) -> Result<Self> {
        if uri == MEMORY_URI {
            return Self::open_in_memory();
        }

        let dir = expand_home(uri);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(DB_FILE);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        tracing::debug!("Opened vector store at {}", path.display());
        Self::init(conn, path.display().to_string())
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, MEMORY_URI.to_string())
    }

    fn init(conn: Connection, location: String) -> Result<Self> {
        register_distance(&conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG} (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                dim INTEGER,
                created_at TEXT NOT NULL
            );"
        ))?;
        Ok(Self { conn, location })
    }

    /// Where the store lives: the database path or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Names of all tables owned by the store.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT name FROM {CATALOG} ORDER BY name"))?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Check if a table exists.
    pub fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.catalog_entry(name)?.is_some())
    }

    /// Create an embeddings table, replacing any existing table of that name.
    pub fn create_embeddings_table(&self, name: &str, dim: usize) -> Result<TableHandle> {
        let table = quote_ident(name);
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                idx INTEGER PRIMARY KEY,
                im_file TEXT NOT NULL,
                labels TEXT NOT NULL,
                cls TEXT NOT NULL,
                bboxes TEXT NOT NULL,
                segments TEXT NOT NULL,
                vector BLOB NOT NULL
             );"
        ))?;
        self.record_table(name, KIND_EMBEDDINGS, Some(dim))?;

        Ok(TableHandle {
            name: name.to_string(),
            dim,
        })
    }

    /// Open an existing embeddings table.
    pub fn open_table(&self, name: &str) -> Result<TableHandle> {
        match self.catalog_entry(name)? {
            Some((kind, Some(dim))) if kind == KIND_EMBEDDINGS => Ok(TableHandle {
                name: name.to_string(),
                dim,
            }),
            Some((kind, _)) => Err(ExplorerError::Config(format!(
                "Table {} holds {} rows, not embeddings",
                name, kind
            ))),
            None => Err(ExplorerError::Config(format!(
                "Table {} does not exist",
                name
            ))),
        }
    }

    /// Append one record.
    pub fn add(&self, table: &TableHandle, record: &EmbeddingRecord) -> Result<()> {
        if record.vector.len() != table.dim {
            return Err(ExplorerError::Embedding(format!(
                "Embedding for {} has width {}, table {} expects {}",
                record.im_file,
                record.vector.len(),
                table.name,
                table.dim
            )));
        }

        self.conn.execute(
            &format!(
                "INSERT INTO {} ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                quote_ident(&table.name)
            ),
            params![
                record.idx,
                record.im_file,
                serde_json::to_string(&record.meta.labels)?,
                serde_json::to_string(&record.meta.cls)?,
                serde_json::to_string(&record.meta.bboxes)?,
                serde_json::to_string(&record.meta.segments)?,
                encode_vector(&record.vector),
            ],
        )?;
        Ok(())
    }

    /// Number of rows in a table.
    pub fn count(&self, table: &TableHandle) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&table.name)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Nearest neighbours of `vector`, closest first.
    pub fn search(&self, table: &TableHandle, vector: &[f32], limit: usize) -> Result<ResultTable> {
        if vector.len() != table.dim {
            return Err(ExplorerError::InvalidInput(format!(
                "Query vector has width {}, table {} expects {}",
                vector.len(),
                table.name,
                table.dim
            )));
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}, l2_distance(vector, ?1) AS _distance
             FROM {}
             ORDER BY _distance ASC, idx ASC
             LIMIT ?2",
            quote_ident(&table.name)
        ))?;
        let rows = stmt
            .query_map(params![encode_vector(vector), limit as i64], |row| {
                Ok(ResultRow {
                    record: record_from_row(row)?,
                    distance: Some(row.get::<_, f64>(7)? as f32),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ResultTable::new(rows))
    }

    /// Rows matching a SQL predicate, in index order. `None` returns every row.
    pub fn filter(&self, table: &TableHandle, predicate: Option<&str>) -> Result<ResultTable> {
        let where_clause = predicate
            .map(|p| format!("WHERE ({})", p))
            .unwrap_or_default();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} {} ORDER BY idx",
            quote_ident(&table.name),
            where_clause
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ResultRow {
                    record: record_from_row(row)?,
                    distance: None,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ResultTable::new(rows))
    }

    /// Rows at the given indexes, in the order requested.
    pub fn take(&self, table: &TableHandle, idxs: &[i64]) -> Result<ResultTable> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE idx = ?1",
            quote_ident(&table.name)
        ))?;

        let mut rows = Vec::with_capacity(idxs.len());
        for idx in idxs {
            let record = stmt.query_row([idx], record_from_row).optional()?;
            match record {
                Some(record) => rows.push(ResultRow {
                    record,
                    distance: None,
                }),
                None => {
                    return Err(ExplorerError::Config(format!(
                        "Index {} is not in table {}",
                        idx, table.name
                    )));
                }
            }
        }
        Ok(ResultTable::new(rows))
    }

    /// Index, path, and vector of every row, in index order.
    pub fn vectors(&self, table: &TableHandle) -> Result<Vec<(i64, String, Vec<f32>)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT idx, im_file, vector FROM {} ORDER BY idx",
            quote_ident(&table.name)
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok((row.get(0)?, row.get(1)?, decode_vector(&blob)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Create a similarity index table, replacing any existing one.
    pub fn create_sim_index_table(&self, name: &str) -> Result<()> {
        let table = quote_ident(name);
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                idx INTEGER PRIMARY KEY,
                im_file TEXT NOT NULL,
                count INTEGER NOT NULL,
                sim_im_files TEXT NOT NULL
             );"
        ))?;
        self.record_table(name, KIND_SIM_INDEX, None)
    }

    /// Append one similarity record.
    pub fn add_sim_record(&self, name: &str, record: &SimIndexRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (idx, im_file, count, sim_im_files) VALUES (?1, ?2, ?3, ?4)",
                quote_ident(name)
            ),
            params![
                record.idx,
                record.im_file,
                record.count as i64,
                serde_json::to_string(&record.sim_im_files)?,
            ],
        )?;
        Ok(())
    }

    /// Read a persisted similarity index.
    pub fn read_sim_index(&self, name: &str) -> Result<SimilarityIndex> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT idx, im_file, count, sim_im_files FROM {} ORDER BY idx",
            quote_ident(name)
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SimIndexRecord {
                    idx: row.get(0)?,
                    im_file: row.get(1)?,
                    count: row.get::<_, i64>(2)? as usize,
                    sim_im_files: json_column(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(SimilarityIndex::new(rows))
    }

    fn catalog_entry(&self, name: &str) -> Result<Option<(String, Option<usize>)>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT kind, dim FROM {CATALOG} WHERE name = ?1"),
                [name],
                |row| {
                    let dim: Option<i64> = row.get(1)?;
                    Ok((row.get::<_, String>(0)?, dim.map(|d| d as usize)))
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn record_table(&self, name: &str, kind: &str, dim: Option<usize>) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {CATALOG} (name, kind, dim, created_at)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![
                name,
                kind,
                dim.map(|d| d as i64),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

/// Register `l2_distance(a, b)`: squared Euclidean distance between two vector blobs.
fn register_distance(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "l2_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            if a.len() != b.len() {
                return Err(rusqlite::Error::UserFunctionError(
                    "l2_distance: vectors differ in width".into(),
                ));
            }
            Ok(squared_l2(a, b))
        },
    )?;
    Ok(())
}

fn squared_l2(a: &[u8], b: &[u8]) -> f64 {
    a.chunks_exact(4)
        .zip(b.chunks_exact(4))
        .map(|(x, y)| {
            let d = f64::from(f32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                - f64::from(f32::from_le_bytes([y[0], y[1], y[2], y[3]]));
            d * d
        })
        .sum()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
    let blob: Vec<u8> = row.get(6)?;
    Ok(EmbeddingRecord {
        idx: row.get(0)?,
        im_file: row.get(1)?,
        meta: LabelMetadata {
            labels: json_column(row, 2)?,
            cls: json_column(row, 3)?,
            bboxes: json_column(row, 4)?,
            segments: json_column(row, 5)?,
        },
        vector: decode_vector(&blob),
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Quote a table name as an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn expand_home(uri: &str) -> PathBuf {
    if let Some(rest) = uri.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    } else if uri == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(uri)
}
