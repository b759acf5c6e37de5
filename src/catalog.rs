//! Read-only icon catalog loaded from the pre-built SQLite file.
//!
//! The offline pipeline writes one row per icon into `icons`, with the
//! embedding stored as a JSON array (or a little-endian `f32` blob when copied
//! out of a `vec0` table). The whole table is read once at startup and never
//! mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::error::{Error, Result};

/// One icon in the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IconRecord {
    pub name: String,
    pub filename: String,
    /// Asset location relative to the static root
    pub path: String,
    pub description: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Record plus the lower-cased text the lexical scorer compares against
#[derive(Debug)]
pub(crate) struct CatalogEntry {
    pub(crate) record: Arc<IconRecord>,
    pub(crate) name_lower: String,
    pub(crate) description_lower: String,
}

/// Build information written next to the icons by the pipeline
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogMetadata {
    entries: BTreeMap<String, String>,
}

impl CatalogMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.get("embedding_model").filter(|m| !m.is_empty())
    }

    pub fn embedding_dimensions(&self) -> Option<usize> {
        self.get("embedding_dimensions")?.trim().parse().ok().filter(|d| *d > 0)
    }

    pub fn database_version(&self) -> Option<&str> {
        self.get("database_version")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for CatalogMetadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    /// Records whose embedding has the declared dimension
    pub embedded: usize,
    pub missing_embeddings: usize,
    /// Embeddings that failed to decode or have the wrong dimension
    pub malformed_embeddings: usize,
}

/// Immutable icon catalog, sorted by name
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
    dimension: Option<usize>,
    metadata: CatalogMetadata,
    stats: CatalogStats,
}

impl Catalog {
    /// Build a catalog from in-memory records.
    ///
    /// `declared_dimension` wins over the most common embedding length.
    /// Records are kept even when their embedding does not match; the vector
    /// scan skips them.
    pub fn from_records(records: Vec<IconRecord>, declared_dimension: Option<usize>) -> Result<Self> {
        Self::build(records, declared_dimension, CatalogMetadata::default(), 0, Path::new(":memory:"))
    }

    /// Load the catalog from a SQLite file, reading the embedding dimension
    /// from the file's metadata.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_dimension(path, None)
    }

    /// Load the catalog, overriding the declared embedding dimension
    pub fn load_with_dimension(path: &Path, dimension: Option<usize>) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::catalog(path, "file not found"));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| Error::catalog(path, e))?;

        let metadata = read_metadata(&conn).map_err(|e| Error::catalog(path, e))?;
        let (records, undecodable) = read_icons(&conn).map_err(|e| Error::catalog(path, e))?;

        let declared = dimension.or_else(|| metadata.embedding_dimensions());
        let catalog = Self::build(records, declared, metadata, undecodable, path)?;

        let stats = catalog.stats;
        tracing::info!(
            "Loaded {} icons from {:?} ({} embedded, {} missing, {} malformed, dimension {:?})",
            stats.total,
            path,
            stats.embedded,
            stats.missing_embeddings,
            stats.malformed_embeddings,
            catalog.dimension
        );

        Ok(catalog)
    }

    fn build(
        mut records: Vec<IconRecord>,
        declared_dimension: Option<usize>,
        metadata: CatalogMetadata,
        undecodable: usize,
        source: &Path,
    ) -> Result<Self> {
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let mut by_name = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            if record.name.trim().is_empty() {
                return Err(Error::catalog(source, format!("record {} has an empty name", idx)));
            }
            if by_name.insert(record.name.clone(), idx).is_some() {
                return Err(Error::catalog(source, format!("duplicate icon name '{}'", record.name)));
            }
        }

        let dimension = declared_dimension.or_else(|| dominant_dimension(&records));

        let mut stats = CatalogStats {
            total: records.len(),
            malformed_embeddings: undecodable,
            ..Default::default()
        };
        for record in &records {
            match (&record.embedding, dimension) {
                (Some(e), Some(d)) if e.len() == d => stats.embedded += 1,
                (Some(e), _) => {
                    tracing::debug!(
                        "Icon '{}' has a {}-dimensional embedding, catalog uses {:?}",
                        record.name,
                        e.len(),
                        dimension
                    );
                    stats.malformed_embeddings += 1;
                }
                (None, _) => stats.missing_embeddings += 1,
            }
        }
        stats.missing_embeddings = stats.missing_embeddings.saturating_sub(undecodable);

        if stats.malformed_embeddings > 0 {
            tracing::warn!(
                "{} icons have malformed embeddings and will only match lexically",
                stats.malformed_embeddings
            );
        }

        let entries = records
            .into_iter()
            .map(|record| CatalogEntry {
                name_lower: record.name.to_lowercase(),
                description_lower: record.description.to_lowercase(),
                record: Arc::new(record),
            })
            .collect();

        Ok(Self {
            entries,
            by_name,
            dimension,
            metadata,
            stats,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared embedding dimension, if any record carries an embedding
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn metadata(&self) -> &CatalogMetadata {
        &self.metadata
    }

    pub fn stats(&self) -> CatalogStats {
        self.stats
    }

    /// Look up an icon by its name
    pub fn get(&self, name: &str) -> Option<&Arc<IconRecord>> {
        self.by_name.get(name).map(|&idx| &self.entries[idx].record)
    }

    /// All records in name order
    pub fn records(&self) -> impl Iterator<Item = &Arc<IconRecord>> {
        self.entries.iter().map(|e| &e.record)
    }

    pub(crate) fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

/// Load the catalog without blocking the async runtime
pub async fn load_catalog(path: PathBuf, dimension: Option<usize>) -> Result<Arc<Catalog>> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || Catalog::load_with_dimension(&task_path, dimension))
        .await
        .map_err(|e| Error::catalog(path, e))?
        .map(Arc::new)
}

fn read_metadata(conn: &Connection) -> Result<CatalogMetadata> {
    let has_table: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
        [],
        |row| row.get(0),
    )?;
    if has_table == 0 {
        return Ok(CatalogMetadata::default());
    }

    let mut stmt = conn.prepare("SELECT key, value FROM metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries.into_iter().collect())
}

/// Read every icon row. Returns the records and the number of embeddings that
/// could not be decoded (those records keep `embedding: None`).
fn read_icons(conn: &Connection) -> Result<(Vec<IconRecord>, usize)> {
    let mut stmt = conn.prepare(
        "SELECT name, filename, local_path, description, width, height, embedding \
         FROM icons ORDER BY name",
    )?;
    let mut rows = stmt.query([])?;

    let mut records = Vec::new();
    let mut undecodable = 0;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let embedding = match decode_embedding(row.get_ref(6)?) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::debug!("{}", Error::MalformedRecord { name: name.clone(), reason: e });
                undecodable += 1;
                None
            }
        };

        records.push(IconRecord {
            name,
            filename: row.get(1)?,
            path: row.get(2)?,
            description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            width: pixel_size(row.get(4)?),
            height: pixel_size(row.get(5)?),
            embedding,
        });
    }

    Ok((records, undecodable))
}

fn pixel_size(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

/// Decode a stored embedding: JSON text, raw `f32` blob, or NULL
fn decode_embedding(value: ValueRef<'_>) -> std::result::Result<Option<Vec<f32>>, String> {
    let embedding = match value {
        ValueRef::Null => return Ok(None),
        ValueRef::Text(text) => {
            serde_json::from_slice::<Vec<f32>>(text).map_err(|e| format!("invalid embedding JSON: {}", e))?
        }
        ValueRef::Blob(bytes) => {
            if bytes.len() % 4 != 0 {
                return Err(format!("embedding blob of {} bytes is not a multiple of 4", bytes.len()));
            }
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
        other => return Err(format!("unexpected embedding column type {:?}", other.data_type())),
    };

    if embedding.is_empty() {
        return Err("embedding is empty".to_string());
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains non-finite values".to_string());
    }
    Ok(Some(embedding))
}

/// Most common embedding length; ties go to the length seen first
fn dominant_dimension(records: &[IconRecord]) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for len in records.iter().filter_map(|r| r.embedding.as_ref().map(Vec::len)) {
        match counts.iter_mut().find(|(l, _)| *l == len) {
            Some((_, count)) => *count += 1,
            None => counts.push((len, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (len, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((len, count));
        }
    }
    best.map(|(len, _)| len)
}
