//! Persisted vector collection on SQLite.
//!
//! One connection guarded by a mutex serializes writers (`add`, `clear`)
//! against readers (`similarity_search`, `count`). Embeddings are computed
//! before the lock is taken so slow backends never block readers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use docchat_core::db;
use docchat_core::domain::Fragment;
use docchat_core::error::AppError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embeddings::Embedder;

pub mod similarity;

use similarity::{
    cosine_similarity, decode_embedding, encode_embedding, l2_norm, relevance_from_cosine,
};

pub const DB_FILE_NAME: &str = "vectors.sqlite";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub collection_name: String,
    pub document_count: usize,
    pub embedding_model: String,
    pub persist_directory: String,
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    persist_directory: PathBuf,
    collection: String,
    embedding_model: String,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("persist_directory", &self.persist_directory)
            .field("collection", &self.collection)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl VectorStore {
    /// Open (or create) `collection` in `<persist_directory>/vectors.sqlite`.
    pub fn open(
        persist_directory: &Path,
        collection: &str,
        embedding_model: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(persist_directory).map_err(|e| {
            AppError::new("STORE_OPEN_FAILED", "Failed to create vector store directory")
                .with_details(format!("path={}; err={}", persist_directory.display(), e))
        })?;
        let conn = db::open(&persist_directory.join(DB_FILE_NAME))?;
        Self::from_connection(
            conn,
            persist_directory.to_path_buf(),
            collection,
            embedding_model,
            embedder,
        )
    }

    /// Non-persistent store, mostly for tests and dry runs.
    pub fn open_in_memory(
        collection: &str,
        embedding_model: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, AppError> {
        let conn = db::open_in_memory()?;
        Self::from_connection(
            conn,
            PathBuf::from(":memory:"),
            collection,
            embedding_model,
            embedder,
        )
    }

    fn from_connection(
        mut conn: Connection,
        persist_directory: PathBuf,
        collection: &str,
        embedding_model: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, AppError> {
        db::migrate(&mut conn)?;
        ensure_collection(&conn, collection, embedding_model)?;
        let store = Self {
            conn: Mutex::new(conn),
            persist_directory,
            collection: collection.to_string(),
            embedding_model: embedding_model.to_string(),
            embedder,
        };
        tracing::info!(
            collection = %store.collection,
            persist_directory = %store.persist_directory.display(),
            documents = store.count(),
            "vector store ready"
        );
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn persist_directory(&self) -> &Path {
        &self.persist_directory
    }

    /// Embed and persist `fragments`; returns how many were stored.
    pub fn add(&self, fragments: &[Fragment]) -> Result<usize, AppError> {
        if fragments.is_empty() {
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(fragments.len());
        for f in fragments {
            let v = self.embedder.embed(&self.embedding_model, &f.content)?;
            if v.is_empty() {
                return Err(AppError::new(
                    "EMBEDDINGS_FAILED",
                    "Embedding backend returned an empty vector",
                )
                .with_details(format!("source={}; chunk={}", f.source_id, f.chunk_index)));
            }
            if let Some(first) = vectors.first().map(|x: &Vec<f32>| x.len()) {
                if v.len() != first {
                    return Err(dims_mismatch(first, v.len()));
                }
            }
            vectors.push(v);
        }
        let dims = vectors[0].len();

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| {
            AppError::new("STORE_WRITE_FAILED", "Failed to start vector store transaction")
                .with_details(e.to_string())
        })?;

        let recorded: Option<i64> = tx
            .query_row(
                "SELECT dims FROM collections WHERE name = ?1",
                [&self.collection],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map_err(|e| {
                AppError::new("STORE_READ_FAILED", "Failed to read collection dims")
                    .with_details(e.to_string())
            })?
            .flatten();
        match recorded {
            Some(d) if d as usize != dims => return Err(dims_mismatch(d as usize, dims)),
            Some(_) => {}
            None => {
                tx.execute(
                    "UPDATE collections SET dims = ?1 WHERE name = ?2",
                    params![dims as i64, &self.collection],
                )
                .map_err(|e| {
                    AppError::new("STORE_WRITE_FAILED", "Failed to record collection dims")
                        .with_details(e.to_string())
                })?;
            }
        }

        {
            let mut stmt = tx
                .prepare(
                    r#"INSERT INTO fragments
                         (collection, source_id, chunk_index, total_chunks, start_offset,
                          content, content_sha256, metadata, embedding)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                )
                .map_err(|e| {
                    AppError::new("STORE_WRITE_FAILED", "Failed to prepare fragment insert")
                        .with_details(e.to_string())
                })?;
            for (f, v) in fragments.iter().zip(vectors.iter()) {
                let metadata = serde_json::to_string(&f.metadata).map_err(|e| {
                    AppError::new("STORE_WRITE_FAILED", "Failed to encode fragment metadata")
                        .with_details(e.to_string())
                })?;
                stmt.execute(params![
                    &self.collection,
                    &f.source_id,
                    f.chunk_index,
                    f.total_chunks,
                    f.start_offset as i64,
                    &f.content,
                    sha256_hex(&f.content),
                    metadata,
                    encode_embedding(v),
                ])
                .map_err(|e| {
                    AppError::new("STORE_WRITE_FAILED", "Failed to insert fragment")
                        .with_details(format!(
                            "source={}; chunk={}; err={}",
                            f.source_id, f.chunk_index, e
                        ))
                })?;
            }
        }

        tx.commit().map_err(|e| {
            AppError::new("STORE_WRITE_FAILED", "Failed to commit fragments")
                .with_details(e.to_string())
        })?;
        tracing::info!(
            collection = %self.collection,
            added = fragments.len(),
            dims,
            "fragments stored"
        );
        Ok(fragments.len())
    }

    /// Up to `k` fragments by descending relevance in `[0, 1]`; ties keep insertion order.
    pub fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Fragment, f64)>, AppError> {
        if k == 0 || self.count() == 0 {
            return Ok(Vec::new());
        }

        let qv = self.embedder.embed(&self.embedding_model, query)?;
        let qnorm = l2_norm(&qv);

        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                r#"SELECT id, source_id, chunk_index, total_chunks, start_offset,
                          content, metadata, embedding
                   FROM fragments WHERE collection = ?1 ORDER BY id"#,
            )
            .map_err(|e| {
                AppError::new("RETRIEVAL_QUERY_FAILED", "Failed to prepare similarity scan")
                    .with_details(e.to_string())
            })?;
        let rows = stmt
            .query_map([&self.collection], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    StoredRow {
                        source_id: row.get(1)?,
                        chunk_index: row.get(2)?,
                        total_chunks: row.get(3)?,
                        start_offset: row.get::<_, i64>(4)?,
                        content: row.get(5)?,
                        metadata: row.get(6)?,
                        embedding: row.get(7)?,
                    },
                ))
            })
            .map_err(|e| {
                AppError::new("RETRIEVAL_QUERY_FAILED", "Failed to scan fragments")
                    .with_details(e.to_string())
            })?;

        let mut scored: Vec<(i64, f64, StoredRow)> = Vec::new();
        for row in rows {
            let (id, stored) = row.map_err(|e| {
                AppError::new("RETRIEVAL_QUERY_FAILED", "Failed to read fragment row")
                    .with_details(e.to_string())
            })?;
            let v = decode_embedding(&stored.embedding)?;
            if v.len() != qv.len() {
                return Err(dims_mismatch(v.len(), qv.len()));
            }
            let score = relevance_from_cosine(cosine_similarity(&qv, &v, qnorm, l2_norm(&v)));
            scored.push((id, score, stored));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        let mut out = Vec::with_capacity(scored.len());
        for (_, score, stored) in scored {
            out.push((stored.into_fragment()?, score));
        }
        tracing::info!(
            collection = %self.collection,
            hits = out.len(),
            top_score = out.first().map(|h| h.1).unwrap_or(0.0),
            "similarity search"
        );
        Ok(out)
    }

    /// Drop every fragment and recreate the collection empty.
    pub fn clear(&self) -> Result<(), AppError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| {
            AppError::new("STORE_WRITE_FAILED", "Failed to start vector store transaction")
                .with_details(e.to_string())
        })?;
        tx.execute("DELETE FROM collections WHERE name = ?1", [&self.collection])
            .map_err(|e| {
                AppError::new("STORE_WRITE_FAILED", "Failed to delete collection")
                    .with_details(e.to_string())
            })?;
        ensure_collection(&tx, &self.collection, &self.embedding_model)?;
        tx.commit().map_err(|e| {
            AppError::new("STORE_WRITE_FAILED", "Failed to commit collection reset")
                .with_details(e.to_string())
        })?;
        tracing::info!(collection = %self.collection, "collection cleared");
        Ok(())
    }

    /// Stored fragment count; 0 if counting fails.
    pub fn count(&self) -> usize {
        let conn = self.lock();
        match conn.query_row(
            "SELECT COUNT(*) FROM fragments WHERE collection = ?1",
            [&self.collection],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                tracing::warn!(
                    collection = %self.collection,
                    err = %e,
                    "failed to count fragments"
                );
                0
            }
        }
    }

    pub fn collection_stats(&self) -> CollectionStats {
        CollectionStats {
            collection_name: self.collection.clone(),
            document_count: self.count(),
            embedding_model: self.embedding_model.clone(),
            persist_directory: self.persist_directory.display().to_string(),
        }
    }
}

struct StoredRow {
    source_id: String,
    chunk_index: u32,
    total_chunks: u32,
    start_offset: i64,
    content: String,
    metadata: String,
    embedding: Vec<u8>,
}

impl StoredRow {
    fn into_fragment(self) -> Result<Fragment, AppError> {
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata).map_err(|e| {
            AppError::new("STORE_READ_FAILED", "Failed to decode fragment metadata")
                .with_details(format!("source={}; err={}", self.source_id, e))
        })?;
        Ok(Fragment {
            content: self.content,
            source_id: self.source_id,
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            start_offset: self.start_offset.max(0) as u64,
            metadata,
        })
    }
}

fn ensure_collection(conn: &Connection, name: &str, embedding_model: &str) -> Result<(), AppError> {
    conn.execute(
        r#"INSERT OR IGNORE INTO collections(name, embedding_model, dims, created_at)
           VALUES (?1, ?2, NULL, strftime('%Y-%m-%dT%H:%M:%fZ','now'))"#,
        params![name, embedding_model],
    )
    .map_err(|e| {
        AppError::new("STORE_OPEN_FAILED", "Failed to create collection")
            .with_details(format!("collection={name}; err={e}"))
    })?;
    Ok(())
}

fn dims_mismatch(expected: usize, got: usize) -> AppError {
    AppError::new(
        "STORE_DIMENSION_MISMATCH",
        "Embedding dimension does not match the collection",
    )
    .with_details(format!("expected={expected}; got={got}"))
}

fn sha256_hex(text: &str) -> String {
    let mut h = Sha256::new();
    h.update(text.as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LetterEmbedder;

    impl Embedder for LetterEmbedder {
        fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
            let count = |c: char| input.chars().filter(|x| *x == c).count() as f32;
            Ok(vec![count('a'), count('b'), count('c')])
        }
    }

    fn frag(source: &str, i: u32, n: u32, content: &str) -> Fragment {
        Fragment {
            content: content.to_string(),
            source_id: source.to_string(),
            chunk_index: i,
            total_chunks: n,
            start_offset: 0,
            metadata: BTreeMap::new(),
        }
    }

    fn store() -> VectorStore {
        VectorStore::open_in_memory("documents", "mock", Arc::new(LetterEmbedder)).expect("store")
    }

    #[test]
    fn empty_collection_searches_to_nothing() {
        let s = store();
        assert_eq!(s.count(), 0);
        assert!(s.similarity_search("aaa", 4).expect("search").is_empty());
    }

    #[test]
    fn ranks_by_relevance_and_breaks_ties_by_insertion() {
        let s = store();
        s.add(&[
            frag("x.txt", 0, 4, "bbbb"),
            frag("x.txt", 1, 4, "aaaa"),
            frag("x.txt", 2, 4, "aa"),
            frag("x.txt", 3, 4, "cccc"),
        ])
        .expect("add");
        let hits = s.similarity_search("a", 3).expect("search");
        let idx: Vec<u32> = hits.iter().map(|h| h.0.chunk_index).collect();
        assert_eq!(idx, vec![1, 2, 0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-9);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.1)));
    }

    #[test]
    fn rejects_vectors_of_another_dimension() {
        struct Wide;
        impl Embedder for Wide {
            fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, AppError> {
                Ok(vec![1.0; 5])
            }
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let narrow = VectorStore::open(dir.path(), "documents", "mock", Arc::new(LetterEmbedder))
            .expect("open");
        narrow.add(&[frag("x.txt", 0, 1, "abc")]).expect("add");
        drop(narrow);

        let wide =
            VectorStore::open(dir.path(), "documents", "mock", Arc::new(Wide)).expect("reopen");
        let err = wide.add(&[frag("y.txt", 0, 1, "abc")]).expect_err("dims");
        assert_eq!(err.code, "STORE_DIMENSION_MISMATCH");
        assert_eq!(wide.count(), 1);
    }

    #[test]
    fn clear_resets_dims_and_is_idempotent() {
        let s = store();
        s.add(&[frag("x.txt", 0, 1, "abc")]).expect("add");
        s.clear().expect("clear");
        s.clear().expect("clear again");
        assert_eq!(s.count(), 0);
        assert_eq!(s.collection_stats().document_count, 0);
    }
}
