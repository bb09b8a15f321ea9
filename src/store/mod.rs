// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent document + vector + full-text store.
//!
//! A single SQLite file holds three logical tables: `documents` (chunk
//! rows), `embeddings` (little-endian f32 blobs with precomputed norms),
//! and an FTS5 table providing Okapi BM25 ranking. Writes are serialized
//! through one connection behind a mutex; reads go through a small
//! round-robin pool of read-only connections so WAL snapshot isolation
//! gives readers a consistent view while the writer commits.

pub mod search;

pub use search::{
    Boosts, SearchFilters, SearchHit, SearchOptions, SearchPage, SearchParams,
};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::connectors::{ConnectorRecord, ConnectorStatus};
use crate::error::StoreError;
use crate::types::{ChunkType, Document};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Current schema version, stored in the `meta` table and migrated
/// forward at open.
pub const SCHEMA_VERSION: i64 = 1;

/// Number of read-only connections in the pool.
const READ_POOL_SIZE: usize = 4;

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Path of the database file.
    pub path: PathBuf,
    /// Fixed embedding dimension; mismatching an existing store is an error.
    pub dimension: usize,
    /// Search tuning parameters.
    pub search: SearchParams,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            path: path.into(),
            dimension,
            search: SearchParams::default(),
        }
    }
}

/// The SQLite-backed document store.
#[derive(Debug)]
pub struct DocumentStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    dimension: usize,
    params: SearchParams,
    path: PathBuf,
    closed: AtomicBool,
    degraded: AtomicBool,
}

impl DocumentStore {
    /// Open or create a store at the given path.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let start = Instant::now();

        if options.dimension == 0 {
            return Err(StoreError::InvalidInput(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!(
                        "failed to create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let writer = Connection::open(&options.path)
            .map_err(|e| StoreError::Storage(format!("failed to open database: {}", e)))?;
        writer
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA cache_size = -64000;",
            )
            .map_err(|e| StoreError::Storage(format!("failed to set pragmas: {}", e)))?;

        let store = Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
            dimension: options.dimension,
            params: options.search,
            path: options.path.clone(),
            closed: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        };

        store.initialize_schema()?;

        let mut store = store;
        for _ in 0..READ_POOL_SIZE {
            let reader = Connection::open(&options.path)
                .map_err(|e| StoreError::Storage(format!("failed to open reader: {}", e)))?;
            reader
                .execute_batch(
                    "PRAGMA busy_timeout = 5000;
                     PRAGMA query_only = ON;",
                )
                .map_err(|e| StoreError::Storage(format!("failed to set reader pragmas: {}", e)))?;
            store.readers.push(Mutex::new(reader));
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.open", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(store)
    }

    /// The database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The fixed embedding dimension of this store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The search tuning parameters.
    pub fn search_params(&self) -> &SearchParams {
        &self.params
    }

    /// Whether the store has entered degraded (read-only) mode.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Drain pending writes, checkpoint the WAL, and mark the store
    /// closed. Double-close is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
        tracing::debug!(path = %self.path.display(), "store closed");
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let writer = self.writer.lock().unwrap();

        writer
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                file_path TEXT NOT NULL,
                language TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                doc_id TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
                vector BLOB NOT NULL,
                norm REAL NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS fts USING fts5(
                doc_id UNINDEXED,
                content,
                tokenize = 'unicode61'
            );

            CREATE TABLE IF NOT EXISTS connectors (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                config_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_documents_file_path ON documents(file_path);
            CREATE INDEX IF NOT EXISTS idx_documents_chunk_type ON documents(chunk_type);
            CREATE INDEX IF NOT EXISTS idx_documents_source_type
                ON documents(json_extract(metadata_json, '$.source_type'));
        "#,
            )
            .map_err(|e| StoreError::Storage(format!("failed to create schema: {}", e)))?;

        // Schema version: new stores get the current version, old stores
        // are migrated forward, newer stores are rejected.
        let version: Option<i64> = writer
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse::<i64>().unwrap_or(0))
            })
            .optional()
            .map_err(|e| StoreError::Storage(format!("failed to read schema version: {}", e)))?;

        match version {
            None => {
                writer
                    .execute(
                        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
                        params![SCHEMA_VERSION.to_string()],
                    )
                    .map_err(|e| StoreError::Storage(format!("failed to set version: {}", e)))?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(StoreError::Storage(format!(
                    "store schema version {} is newer than supported {}",
                    v, SCHEMA_VERSION
                )));
            }
            Some(v) if v < SCHEMA_VERSION => {
                // No historical migrations yet; bump the version marker.
                writer
                    .execute(
                        "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
                        params![SCHEMA_VERSION.to_string()],
                    )
                    .map_err(|e| StoreError::Storage(format!("failed to migrate: {}", e)))?;
                tracing::info!(from = v, to = SCHEMA_VERSION, "migrated store schema");
            }
            Some(_) => {}
        }

        // The embedding dimension is fixed at first open.
        let stored_dim: Option<usize> = writer
            .query_row("SELECT value FROM meta WHERE key = 'dimension'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse::<usize>().unwrap_or(0))
            })
            .optional()
            .map_err(|e| StoreError::Storage(format!("failed to read dimension: {}", e)))?;

        match stored_dim {
            None => {
                writer
                    .execute(
                        "INSERT OR REPLACE INTO meta (key, value) VALUES ('dimension', ?1)",
                        params![self.dimension.to_string()],
                    )
                    .map_err(|e| StoreError::Storage(format!("failed to set dimension: {}", e)))?;
            }
            Some(d) if d != self.dimension => {
                return Err(StoreError::InvalidInput(format!(
                    "store was created with dimension {}, configured dimension is {}",
                    d, self.dimension
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Run a closure against the single writer connection.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.degraded.load(Ordering::SeqCst) {
            return Err(StoreError::Degraded(
                "previous corruption error; writes refused".to_string(),
            ));
        }
        let mut writer = self.writer.lock().unwrap();
        let result = f(&mut writer);
        if let Err(ref e) = result {
            if e.is_corruption() {
                self.degraded.store(true, Ordering::SeqCst);
                tracing::error!(error = %e, "store entered degraded mode");
            }
        }
        result
    }

    /// Run a closure against one connection of the read pool.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let reader = self.readers[idx].lock().unwrap();
        f(&reader)
    }

    fn map_sql_err(&self, context: &str, e: rusqlite::Error) -> StoreError {
        if let rusqlite::Error::SqliteFailure(code, _) = &e {
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ) {
                return StoreError::Degraded(format!("{}: {}", context, e));
            }
        }
        StoreError::Storage(format!("{}: {}", context, e))
    }

    /// Insert or replace a document; returns true when newly created.
    pub fn upsert(&self, doc: &Document) -> Result<bool, StoreError> {
        Ok(self.upsert_batch(std::slice::from_ref(doc))? > 0)
    }

    /// Insert or replace a batch of documents in one transaction;
    /// returns the number of newly created rows. A failure rolls back
    /// the whole batch.
    pub fn upsert_batch(&self, docs: &[Document]) -> Result<usize, StoreError> {
        let start = Instant::now();

        for doc in docs {
            self.validate_document(doc)?;
        }

        let created = self.write(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| self.map_sql_err("failed to begin transaction", e))?;

            let now = Utc::now();
            let mut created = 0usize;
            for doc in docs {
                if Self::upsert_in_tx(&tx, doc, now)
                    .map_err(|e| self.map_sql_err("failed to upsert document", e))?
                {
                    created += 1;
                }
            }

            tx.commit()
                .map_err(|e| self.map_sql_err("failed to commit batch", e))?;
            Ok(created)
        })?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("store.upsert_batch", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(created)
    }

    fn validate_document(&self, doc: &Document) -> Result<(), StoreError> {
        if doc.id.is_empty() {
            return Err(StoreError::InvalidInput("document id is empty".to_string()));
        }
        if doc.end_line < doc.start_line {
            return Err(StoreError::InvalidInput(format!(
                "document {} has end_line {} < start_line {}",
                doc.id, doc.end_line, doc.start_line
            )));
        }
        if let Some(vector) = &doc.embedding {
            if vector.len() != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }

    fn upsert_in_tx(
        tx: &rusqlite::Transaction<'_>,
        doc: &Document,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<bool> {
        let existed: bool = tx
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![doc.id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        let metadata_json =
            serde_json::to_string(&doc.metadata).unwrap_or_else(|_| "{}".to_string());

        tx.execute(
            "INSERT INTO documents
                 (id, content, file_path, language, chunk_type, start_line, end_line,
                  metadata_json, content_hash, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 content = excluded.content,
                 file_path = excluded.file_path,
                 language = excluded.language,
                 chunk_type = excluded.chunk_type,
                 start_line = excluded.start_line,
                 end_line = excluded.end_line,
                 metadata_json = excluded.metadata_json,
                 content_hash = excluded.content_hash,
                 indexed_at = excluded.indexed_at",
            params![
                doc.id,
                doc.content,
                doc.file_path,
                doc.language,
                doc.chunk_type.as_str(),
                doc.start_line,
                doc.end_line,
                metadata_json,
                doc.content_hash,
                format_timestamp(now),
            ],
        )?;

        match &doc.embedding {
            Some(vector) => {
                let blob = encode_vector(vector);
                let norm = l2_norm(vector) as f64;
                tx.execute(
                    "INSERT INTO embeddings (doc_id, vector, norm) VALUES (?1, ?2, ?3)
                     ON CONFLICT(doc_id) DO UPDATE SET
                         vector = excluded.vector,
                         norm = excluded.norm",
                    params![doc.id, blob, norm],
                )?;
            }
            None => {
                tx.execute("DELETE FROM embeddings WHERE doc_id = ?1", params![doc.id])?;
            }
        }

        tx.execute("DELETE FROM fts WHERE doc_id = ?1", params![doc.id])?;
        tx.execute(
            "INSERT INTO fts (doc_id, content) VALUES (?1, ?2)",
            params![doc.id, doc.content],
        )?;

        Ok(!existed)
    }

    /// Delete a document by id; returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| self.map_sql_err("failed to begin transaction", e))?;
            tx.execute("DELETE FROM fts WHERE doc_id = ?1", params![id])
                .map_err(|e| self.map_sql_err("failed to delete fts row", e))?;
            tx.execute("DELETE FROM embeddings WHERE doc_id = ?1", params![id])
                .map_err(|e| self.map_sql_err("failed to delete embedding", e))?;
            let removed = tx
                .execute("DELETE FROM documents WHERE id = ?1", params![id])
                .map_err(|e| self.map_sql_err("failed to delete document", e))?;
            tx.commit()
                .map_err(|e| self.map_sql_err("failed to commit delete", e))?;
            Ok(removed > 0)
        })
    }

    /// Delete every document belonging to a file; returns the count removed.
    pub fn delete_by_file(&self, file_path: &str) -> Result<usize, StoreError> {
        self.delete_where_file(file_path, None)
    }

    /// Delete documents of a file whose ids are not in `keep`. Used after
    /// re-chunking so chunks whose id no longer appears are destroyed.
    pub fn delete_stale(&self, file_path: &str, keep: &[String]) -> Result<usize, StoreError> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        self.delete_where_file(file_path, Some(&keep))
    }

    fn delete_where_file(
        &self,
        file_path: &str,
        keep: Option<&HashSet<&str>>,
    ) -> Result<usize, StoreError> {
        self.write(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| self.map_sql_err("failed to begin transaction", e))?;

            let ids: Vec<String> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM documents WHERE file_path = ?1")
                    .map_err(|e| self.map_sql_err("failed to prepare delete scan", e))?;
                let rows = stmt
                    .query_map(params![file_path], |row| row.get::<_, String>(0))
                    .map_err(|e| self.map_sql_err("failed to scan documents", e))?;
                rows.filter_map(|r| r.ok())
                    .filter(|id| keep.map_or(true, |k| !k.contains(id.as_str())))
                    .collect()
            };

            for id in &ids {
                tx.execute("DELETE FROM fts WHERE doc_id = ?1", params![id])
                    .map_err(|e| self.map_sql_err("failed to delete fts row", e))?;
                tx.execute("DELETE FROM embeddings WHERE doc_id = ?1", params![id])
                    .map_err(|e| self.map_sql_err("failed to delete embedding", e))?;
                tx.execute("DELETE FROM documents WHERE id = ?1", params![id])
                    .map_err(|e| self.map_sql_err("failed to delete document", e))?;
            }

            tx.commit()
                .map_err(|e| self.map_sql_err("failed to commit delete", e))?;
            Ok(ids.len())
        })
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Fetch a document by id, including its embedding when present.
    pub fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.read(|conn| {
            let doc = conn
                .query_row(
                    "SELECT id, content, file_path, language, chunk_type, start_line, end_line,
                            metadata_json, content_hash, indexed_at
                     FROM documents WHERE id = ?1",
                    params![id],
                    row_to_document,
                )
                .optional()
                .map_err(|e| self.map_sql_err("failed to get document", e))?;

            let Some(mut doc) = doc else {
                return Ok(None);
            };

            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector FROM embeddings WHERE doc_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| self.map_sql_err("failed to get embedding", e))?;
            doc.embedding = blob.map(|b| decode_vector(&b));

            Ok(Some(doc))
        })
    }

    /// Total number of documents.
    pub fn count(&self) -> Result<i64, StoreError> {
        self.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| self.map_sql_err("failed to count documents", e))
        })
    }

    /// Number of documents with an embedding.
    pub fn embedded_count(&self) -> Result<i64, StoreError> {
        self.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                .map_err(|e| self.map_sql_err("failed to count embeddings", e))
        })
    }

    /// Fetch all documents of one file, ordered by start line.
    pub fn find_by_file(&self, file_path: &str, limit: usize) -> Result<Vec<Document>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, content, file_path, language, chunk_type, start_line, end_line,
                            metadata_json, content_hash, indexed_at
                     FROM documents WHERE file_path = ?1 ORDER BY start_line LIMIT ?2",
                )
                .map_err(|e| self.map_sql_err("failed to prepare file scan", e))?;
            let rows = stmt
                .query_map(params![file_path, limit as i64], row_to_document)
                .map_err(|e| self.map_sql_err("failed to scan file documents", e))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Fetch documents whose `ticket_ids` metadata contains the ticket.
    pub fn find_by_ticket(&self, ticket_id: &str, limit: usize) -> Result<Vec<Document>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, content, file_path, language, chunk_type, start_line, end_line,
                            metadata_json, content_hash, indexed_at
                     FROM documents
                     WHERE EXISTS (
                         SELECT 1 FROM json_each(documents.metadata_json, '$.ticket_ids')
                         WHERE json_each.value = ?1
                     )
                     ORDER BY indexed_at DESC LIMIT ?2",
                )
                .map_err(|e| self.map_sql_err("failed to prepare ticket scan", e))?;
            let rows = stmt
                .query_map(params![ticket_id, limit as i64], row_to_document)
                .map_err(|e| self.map_sql_err("failed to scan ticket documents", e))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Fetch a batch of documents by id (embeddings not attached).
    pub(crate) fn get_documents(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Document>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.read(|conn| {
            let mut out = HashMap::with_capacity(ids.len());
            for chunk in ids.chunks(256) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "SELECT id, content, file_path, language, chunk_type, start_line, end_line,
                            metadata_json, content_hash, indexed_at
                     FROM documents WHERE id IN ({})",
                    placeholders
                );
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| self.map_sql_err("failed to prepare batch get", e))?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(chunk.iter()), row_to_document)
                    .map_err(|e| self.map_sql_err("failed to batch get documents", e))?;
                for row in rows.filter_map(|r| r.ok()) {
                    out.insert(row.id.clone(), row);
                }
            }
            Ok(out)
        })
    }

    // ------------------------------------------------------------------
    // Connector records
    // ------------------------------------------------------------------

    /// List persisted connector records, ordered by id.
    pub fn connector_list(&self) -> Result<Vec<ConnectorRecord>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, kind, name, status, config_json FROM connectors ORDER BY id")
                .map_err(|e| self.map_sql_err("failed to prepare connector list", e))?;
            let rows = stmt
                .query_map([], row_to_connector)
                .map_err(|e| self.map_sql_err("failed to list connectors", e))?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    /// Fetch one connector record.
    pub fn connector_get(&self, id: &str) -> Result<Option<ConnectorRecord>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT id, kind, name, status, config_json FROM connectors WHERE id = ?1",
                params![id],
                row_to_connector,
            )
            .optional()
            .map_err(|e| self.map_sql_err("failed to get connector", e))
        })
    }

    /// Insert or replace a connector record.
    pub fn connector_put(&self, record: &ConnectorRecord) -> Result<(), StoreError> {
        let config_json =
            serde_json::to_string(&record.config).unwrap_or_else(|_| "{}".to_string());
        self.write(|conn| {
            conn.execute(
                "INSERT INTO connectors (id, kind, name, status, config_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     kind = excluded.kind,
                     name = excluded.name,
                     status = excluded.status,
                     config_json = excluded.config_json",
                params![
                    record.id,
                    record.kind,
                    record.name,
                    record.status.as_str(),
                    config_json
                ],
            )
            .map_err(|e| self.map_sql_err("failed to put connector", e))?;
            Ok(())
        })
    }

    /// Remove a connector record; returns whether it existed.
    pub fn connector_delete(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|conn| {
            let removed = conn
                .execute("DELETE FROM connectors WHERE id = ?1", params![id])
                .map_err(|e| self.map_sql_err("failed to delete connector", e))?;
            Ok(removed > 0)
        })
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------
// Row mapping and vector encoding
// ----------------------------------------------------------------------

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get(7)?;
    let indexed_at: String = row.get(9)?;
    let chunk_type: String = row.get(4)?;
    Ok(Document {
        id: row.get(0)?,
        content: row.get(1)?,
        file_path: row.get(2)?,
        language: row.get(3)?,
        chunk_type: ChunkType::from_str(&chunk_type),
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        content_hash: row.get(8)?,
        indexed_at: parse_timestamp(&indexed_at),
        embedding: None,
    })
}

fn row_to_connector(row: &Row<'_>) -> rusqlite::Result<ConnectorRecord> {
    let status: String = row.get(3)?;
    let config_json: String = row.get(4)?;
    Ok(ConnectorRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        status: ConnectorStatus::from_str(&status),
        config: serde_json::from_str(&config_json).unwrap_or_default(),
    })
}

/// Fixed-width RFC 3339 with millisecond precision, so stored values
/// compare correctly as strings.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Serialize a vector to little-endian f32 bytes.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize little-endian f32 bytes.
pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

pub(crate) fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}
