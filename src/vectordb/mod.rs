//! Vector DB service: per-knowledge-base collections of embedded chunks,
//! backed by SQLite, with cosine-similarity search scored in Rust.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::Db;
use crate::embeddings::Embedder;
use crate::error::{KbragError, Result};

/// A chunk returned from similarity search, with its stored metadata.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    /// Source document name
    pub filename: String,
    /// 1-indexed position of the chunk within its document
    pub chunk_number: usize,
    pub chunk_text: String,
}

/// Vector store over SQLite: one collection per knowledge base, chunk
/// embeddings stored as little-endian f32 blobs and scored with cosine
/// similarity at query time.
pub struct VectorDb {
    db: Arc<Db>,
    embedder: Arc<dyn Embedder>,
}

/// Deterministic collection name for a knowledge base.
pub fn collection_name(kb_id: &str) -> String {
    format!("knowledge_base_{}", kb_id)
}

impl VectorDb {
    pub fn new(db: Arc<Db>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Embed and upsert chunks into the knowledge base's collection.
    ///
    /// The collection is created lazily on first write; creation is
    /// idempotent (INSERT OR IGNORE followed by a re-read), so concurrent
    /// saves against the same knowledge base never fail the
    /// collection-exists race. Each chunk gets a fresh UUID and metadata
    /// `{filename, chunk_number}` with 1-indexed chunk numbers.
    pub async fn save_chunks(&self, chunks: &[String], kb_id: &str, doc_name: &str) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let embeddings = self.embedder.embed_batch(chunks.to_vec()).await?;
        if embeddings.len() != chunks.len() {
            return Err(KbragError::ExternalService(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let name = collection_name(kb_id);
        let doc_name = doc_name.to_string();
        let rows: Vec<(String, usize, String, Vec<u8>)> = chunks
            .iter()
            .zip(embeddings.iter())
            .enumerate()
            .map(|(idx, (text, embedding))| {
                (
                    Uuid::new_v4().to_string(),
                    idx + 1,
                    text.clone(),
                    embedding_to_blob(embedding),
                )
            })
            .collect();

        let count = rows.len();
        self.db
            .with_connection(move |conn| {
                // Idempotent get-or-create; tolerates concurrent creation
                conn.execute(
                    "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
                    rusqlite::params![name],
                )?;
                let collection_id: i64 = conn.query_row(
                    "SELECT collection_id FROM collections WHERE name = ?1",
                    rusqlite::params![name],
                    |row| row.get(0),
                )?;

                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO chunks (chunk_id, collection_id, filename, chunk_number, chunk_text, embedding) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for (chunk_id, chunk_number, text, blob) in &rows {
                        stmt.execute(rusqlite::params![
                            chunk_id,
                            collection_id,
                            doc_name,
                            *chunk_number as i64,
                            text,
                            blob,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<(), KbragError>(())
            })
            .await?;

        log::debug!(
            "Upserted {} chunks into collection {}",
            count,
            collection_name(kb_id)
        );
        Ok(())
    }

    /// Top-k most similar chunks for a query, unscored.
    pub async fn similarity_search(
        &self,
        query: &str,
        kb_id: &str,
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        let scored = self.similarity_search_with_score(query, kb_id, k).await?;
        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    /// Top-k most similar chunks with their scores attached.
    ///
    /// Score is cosine similarity in [-1, 1]; results are ordered
    /// descending, so the first result is the most similar.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        kb_id: &str,
        k: usize,
    ) -> Result<Vec<(ChunkHit, f32)>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let collection_id = self.lookup_collection(kb_id).await?;

        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id, filename, chunk_number, chunk_text, embedding \
                     FROM chunks WHERE collection_id = ?1 AND embedding IS NOT NULL",
                )?;
                let mut rows = stmt.query(rusqlite::params![collection_id])?;
                let mut results = Vec::new();
                while let Some(row) = rows.next()? {
                    results.push((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ));
                }
                Ok::<Vec<_>, KbragError>(results)
            })
            .await?;

        let mut scored: Vec<(ChunkHit, f32)> = Vec::new();
        for (chunk_id, filename, chunk_number, chunk_text, blob) in rows {
            let embedding = match parse_embedding(&blob) {
                Some(e) => e,
                None => continue,
            };
            if embedding.len() != query_vec.len() {
                continue;
            }
            let score = cosine_similarity(&query_vec, &embedding);
            scored.push((
                ChunkHit {
                    chunk_id,
                    filename,
                    chunk_number: chunk_number as usize,
                    chunk_text,
                },
                score,
            ));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Total chunk count in the knowledge base's collection.
    ///
    /// This counts chunks, not Document records; a knowledge base with one
    /// ten-chunk document reports 10.
    pub async fn kb_chunk_count(&self, kb_id: &str) -> Result<usize> {
        let collection_id = self.lookup_collection(kb_id).await?;
        let count = self
            .db
            .with_connection(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunks WHERE collection_id = ?1",
                    rusqlite::params![collection_id],
                    |row| row.get(0),
                )?;
                Ok::<i64, KbragError>(count)
            })
            .await?;
        Ok(count as usize)
    }

    /// Resolve a collection id; reads never create.
    async fn lookup_collection(&self, kb_id: &str) -> Result<i64> {
        let name = collection_name(kb_id);
        let lookup_name = name.clone();
        let id = self
            .db
            .with_connection(move |conn| {
                let id: Option<i64> = conn
                    .query_row(
                        "SELECT collection_id FROM collections WHERE name = ?1",
                        rusqlite::params![lookup_name],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok::<Option<i64>, KbragError>(id)
            })
            .await?;

        id.ok_or_else(|| KbragError::NotFound(format!("Vector collection {} does not exist", name)))
    }
}

/// Serialize an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Parse embedding BLOB back to Vec<f32>; None when the length is not a
/// multiple of 4.
fn parse_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

/// Cosine similarity between two equal-length vectors; 0.0 when either has
/// zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Deterministic embedder for tests: hashes words into a small vector
    /// so texts sharing words land near each other.
    pub struct FakeEmbedder;

    const DIMS: usize = 16;

    fn fake_embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.to_lowercase().split_whitespace() {
            let idx = word.bytes().map(|b| b as usize).sum::<usize>() % DIMS;
            v[idx] += 1.0;
        }
        v
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_batch(&self, texts: Vec<String>) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| fake_embed(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            Ok(fake_embed(text))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }
    }

    async fn setup_vectordb() -> (VectorDb, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Db::new(temp_dir.path().join("test.db")));
        db.with_connection(migrate::run_migrations).await.unwrap();
        (VectorDb::new(db, Arc::new(FakeEmbedder)), temp_dir)
    }

    #[test]
    fn test_collection_name_is_deterministic() {
        assert_eq!(collection_name("research"), "knowledge_base_research");
        assert_eq!(collection_name("research"), collection_name("research"));
        assert_ne!(collection_name("research"), collection_name("notes"));
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let embedding = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(parse_embedding(&blob).unwrap(), embedding);
    }

    #[test]
    fn test_parse_embedding_invalid_length() {
        assert!(parse_embedding(&[0u8, 1, 2, 3, 4]).is_none());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[0.0, 1.0, 0.0])).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_save_chunks_creates_collection_idempotently() {
        let (vdb, _tmp) = setup_vectordb().await;

        let chunks = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        vdb.save_chunks(&chunks, "research", "paper.pdf").await.unwrap();
        // Second save against the same collection must not fail
        vdb.save_chunks(&chunks, "research", "other.pdf").await.unwrap();

        assert_eq!(vdb.kb_chunk_count("research").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_kb_chunk_count_counts_chunks_not_documents() {
        let (vdb, _tmp) = setup_vectordb().await;

        let doc1: Vec<String> = (0..3).map(|i| format!("doc one chunk {}", i)).collect();
        let doc2: Vec<String> = (0..2).map(|i| format!("doc two chunk {}", i)).collect();
        vdb.save_chunks(&doc1, "research", "one.pdf").await.unwrap();
        vdb.save_chunks(&doc2, "research", "two.pdf").await.unwrap();

        // 2 documents, 5 chunks: the count reflects chunks
        assert_eq!(vdb.kb_chunk_count("research").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reads_against_missing_collection_fail_not_found() {
        let (vdb, _tmp) = setup_vectordb().await;

        let err = vdb.kb_chunk_count("missing").await.unwrap_err();
        assert!(matches!(err, KbragError::NotFound(_)));

        let err = vdb.similarity_search("query", "missing", 5).await.unwrap_err();
        assert!(matches!(err, KbragError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_similarity_search_orders_descending() {
        let (vdb, _tmp) = setup_vectordb().await;

        let chunks = vec![
            "rust ownership borrowing".to_string(),
            "gardening tips for tomatoes".to_string(),
            "rust async runtime tokio".to_string(),
        ];
        vdb.save_chunks(&chunks, "research", "paper.pdf").await.unwrap();

        let results = vdb
            .similarity_search_with_score("rust ownership", "research", 3)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(
                pair[0].1 >= pair[1].1,
                "scores must be ordered descending (higher = more similar)"
            );
        }
        assert!(results[0].0.chunk_text.contains("rust"));
    }

    #[tokio::test]
    async fn test_chunk_metadata_is_one_indexed() {
        let (vdb, _tmp) = setup_vectordb().await;

        let chunks = vec!["first chunk".to_string(), "second chunk".to_string()];
        vdb.save_chunks(&chunks, "research", "paper.pdf").await.unwrap();

        let mut results = vdb.similarity_search("chunk", "research", 10).await.unwrap();
        results.sort_by_key(|hit| hit.chunk_number);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_number, 1);
        assert_eq!(results[1].chunk_number, 2);
        assert!(results.iter().all(|hit| hit.filename == "paper.pdf"));
        // Fresh UUIDs per chunk
        assert_ne!(results[0].chunk_id, results[1].chunk_id);
    }
}
