//! File storage service: raw document bytes, chunk files, and small JSON
//! blobs (user aggregates, intent markers), all at paths computed by the
//! location resolver.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

use crate::error::{KbragError, Result};

/// Filesystem-backed storage for raw documents and chunk lists.
///
/// Chunks are stored one file per chunk with zero-padded 1-indexed
/// filenames (`chunk_0001.txt`, ...), so reading them back restores the
/// original order deterministically. All failures surface as `Storage`
/// errors and propagate to the caller; there is no retry here.
#[derive(Debug, Clone, Default)]
pub struct FileStore;

impl FileStore {
    pub fn new() -> Self {
        Self
    }

    /// Persist raw document bytes, creating parent directories as needed.
    pub async fn save_raw(&self, content: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        log::debug!("Saved {} raw bytes to {}", content.len(), path.display());
        Ok(())
    }

    /// Persist text chunks to a directory, one `.txt` file per chunk.
    ///
    /// The directory is recreated from scratch so it reflects exactly the
    /// given chunk list.
    pub async fn save_text_chunks(&self, chunks: &[String], dir: &Path) -> Result<()> {
        self.save_chunks(chunks, dir, "txt").await
    }

    /// Persist markdown chunks to a directory, one `.md` file per chunk.
    pub async fn save_md_chunks(&self, chunks: &[String], dir: &Path) -> Result<()> {
        self.save_chunks(chunks, dir, "md").await
    }

    async fn save_chunks(&self, chunks: &[String], dir: &Path, extension: &str) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir).await?;
        }
        fs::create_dir_all(dir).await?;

        for (idx, chunk) in chunks.iter().enumerate() {
            let filename = format!("chunk_{:04}.{}", idx + 1, extension);
            fs::write(dir.join(filename), chunk).await?;
        }
        log::debug!("Saved {} chunk files to {}", chunks.len(), dir.display());
        Ok(())
    }

    /// Read text chunks back in their original order.
    pub async fn read_text_chunks(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("chunk_") && name.ends_with(".txt") {
                names.push(name);
            }
        }
        // Zero-padded filenames sort lexicographically in chunk order
        names.sort();

        let mut chunks = Vec::with_capacity(names.len());
        for name in names {
            chunks.push(fs::read_to_string(dir.join(name)).await?);
        }
        Ok(chunks)
    }

    /// Read the text chunks of every document under a knowledge base's
    /// `text_chunks` root, keyed by document stem, in stable (sorted) order.
    ///
    /// Returns an empty list when the root does not exist yet (a knowledge
    /// base with no ingested documents).
    pub async fn read_kb_text_chunks(&self, root: &Path) -> Result<Vec<(String, Vec<String>)>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(root).await?;
        let mut doc_dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                doc_dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        doc_dirs.sort();

        let mut result = Vec::with_capacity(doc_dirs.len());
        for stem in doc_dirs {
            let chunks = self.read_text_chunks(&root.join(&stem)).await?;
            result.push((stem, chunks));
        }
        Ok(result)
    }

    /// Serialize a value as JSON and write it atomically (temp file +
    /// rename), so a crash mid-write never leaves a corrupt blob behind.
    pub async fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| KbragError::Storage(std::io::Error::other(e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read and deserialize a JSON blob previously written by
    /// [`write_json_atomic`](Self::write_json_atomic).
    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| KbragError::Storage(std::io::Error::other(e)))
    }
}
