//! BM25 keyword index: one per knowledge base, rebuilt wholesale from the
//! text chunks on disk and persisted as JSON at the deterministic path the
//! location resolver computes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use walkdir::WalkDir;

use crate::error::{KbragError, Result};
use crate::locations::Locations;
use crate::storage::FileStore;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// One indexed chunk: its source document stem, position, text and term
/// frequencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    doc: String,
    chunk_number: usize,
    text: String,
    term_freqs: HashMap<String, usize>,
    length: usize,
}

/// A keyword-search result.
#[derive(Debug, Clone, Serialize)]
pub struct Bm25Hit {
    /// Document stem the chunk belongs to
    pub doc: String,
    /// 1-indexed position within the document
    pub chunk_number: usize,
    pub chunk_text: String,
    /// Okapi BM25 score; non-negative, higher = better match
    pub score: f32,
}

/// Okapi BM25 index over the text chunks of one knowledge base.
///
/// Serializable; the whole index is rebuilt on every document addition
/// (full rebuild, O(total chunks in the KB)) so it reflects exactly the
/// chunks on disk at rebuild time.
#[derive(Debug, Serialize, Deserialize)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    entries: Vec<IndexedChunk>,
    doc_freqs: HashMap<String, usize>,
    avg_length: f32,
}

impl Bm25Index {
    /// Build an index from (doc_stem, chunks) pairs.
    pub fn build(docs: &[(String, Vec<String>)]) -> Self {
        let mut entries = Vec::new();
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for (doc, chunks) in docs {
            for (idx, text) in chunks.iter().enumerate() {
                let tokens = tokenize(text);
                let mut term_freqs: HashMap<String, usize> = HashMap::new();
                for token in &tokens {
                    *term_freqs.entry(token.clone()).or_insert(0) += 1;
                }
                for term in term_freqs.keys() {
                    *doc_freqs.entry(term.clone()).or_insert(0) += 1;
                }
                entries.push(IndexedChunk {
                    doc: doc.clone(),
                    chunk_number: idx + 1,
                    text: text.clone(),
                    term_freqs,
                    length: tokens.len(),
                });
            }
        }

        let avg_length = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|e| e.length).sum::<usize>() as f32 / entries.len() as f32
        };

        Self {
            k1: K1,
            b: B,
            entries,
            doc_freqs,
            avg_length,
        }
    }

    /// Rank all indexed chunks against a query, returning the top-k with
    /// positive scores, ordered descending.
    pub fn search(&self, query: &str, k: usize) -> Vec<Bm25Hit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.entries.is_empty() {
            return Vec::new();
        }

        let n = self.entries.len() as f32;
        let mut hits: Vec<Bm25Hit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let mut score = 0.0f32;
                for term in &query_terms {
                    let tf = *entry.term_freqs.get(term).unwrap_or(&0) as f32;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = *self.doc_freqs.get(term).unwrap_or(&0) as f32;
                    // Okapi BM25 with the +1 idf floor, so scores stay
                    // non-negative even for very common terms
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let denom = tf
                        + self.k1 * (1.0 - self.b + self.b * entry.length as f32 / self.avg_length);
                    score += idf * tf * (self.k1 + 1.0) / denom;
                }
                if score > 0.0 {
                    Some(Bm25Hit {
                        doc: entry.doc.clone(),
                        chunk_number: entry.chunk_number,
                        chunk_text: entry.text.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    /// Per-document chunk counts as recorded in the index.
    fn doc_chunk_counts(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.doc.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Lowercase alphanumeric tokenization; everything else is a separator.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Result of comparing a persisted index against the chunks on disk.
///
/// The no-rollback ingestion flow can leave index and disk out of step;
/// this report makes the drift visible instead of letting it pass
/// silently.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    /// Documents present in the index whose on-disk chunks are missing or
    /// have a different count
    pub stale_in_index: Vec<String>,
    /// Documents with chunks on disk that the index does not cover
    pub missing_from_index: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.stale_in_index.is_empty() && self.missing_from_index.is_empty()
    }
}

/// Maintains the per-KB BM25 index files.
pub struct Bm25Service {
    store: FileStore,
    locations: Locations,
}

impl Bm25Service {
    pub fn new(store: FileStore, locations: Locations) -> Self {
        Self { store, locations }
    }

    /// Rebuild the knowledge base's index from the full set of text chunks
    /// currently on disk and persist it.
    pub async fn update_index(&self, username: &str, kb_name: &str) -> Result<Bm25Index> {
        let root = self.locations.text_chunks_root(username, kb_name);
        let docs = self.store.read_kb_text_chunks(&root).await?;
        let index = Bm25Index::build(&docs);

        let path = self.locations.bm25_index_path(username, kb_name);
        self.store.write_json_atomic(&path, &index).await?;
        log::info!(
            "Rebuilt BM25 index for {}/{}: {} chunks across {} documents",
            username,
            kb_name,
            index.chunk_count(),
            docs.len()
        );
        Ok(index)
    }

    /// Load the persisted index and rank chunks against the query.
    pub async fn search(
        &self,
        username: &str,
        kb_name: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Bm25Hit>> {
        let index = self.load_index(username, kb_name).await?;
        Ok(index.search(query, k))
    }

    /// Compare the persisted index against the chunk files on disk.
    pub async fn verify_consistency(
        &self,
        username: &str,
        kb_name: &str,
    ) -> Result<ConsistencyReport> {
        let index = self.load_index(username, kb_name).await?;
        let indexed = index.doc_chunk_counts();

        // Count chunk files per document directory on disk
        let root = self.locations.text_chunks_root(username, kb_name);
        let mut on_disk: HashMap<String, usize> = HashMap::new();
        if root.exists() {
            for entry in WalkDir::new(&root).min_depth(2).max_depth(2) {
                let entry = entry.map_err(|e| {
                    KbragError::Storage(std::io::Error::other(e))
                })?;
                let name = entry.file_name().to_string_lossy();
                if entry.file_type().is_file()
                    && name.starts_with("chunk_")
                    && name.ends_with(".txt")
                {
                    if let Some(doc) = entry
                        .path()
                        .parent()
                        .and_then(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                    {
                        *on_disk.entry(doc).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut stale_in_index: Vec<String> = indexed
            .iter()
            .filter(|(doc, count)| on_disk.get(*doc) != Some(count))
            .map(|(doc, _)| doc.clone())
            .collect();
        stale_in_index.sort();

        let mut missing_from_index: Vec<String> = on_disk
            .keys()
            .filter(|doc| !indexed.contains_key(*doc))
            .cloned()
            .collect();
        missing_from_index.sort();

        Ok(ConsistencyReport {
            stale_in_index,
            missing_from_index,
        })
    }

    async fn load_index(&self, username: &str, kb_name: &str) -> Result<Bm25Index> {
        let path = self.locations.bm25_index_path(username, kb_name);
        self.store.read_json(&path).await.map_err(|e| match e {
            KbragError::Storage(io) if io.kind() == std::io::ErrorKind::NotFound => {
                KbragError::NotFound(format!(
                    "BM25 index for knowledge base {} of user {} does not exist",
                    kb_name, username
                ))
            }
            other => other,
        })
    }
}
