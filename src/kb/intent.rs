use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::RawDocument;

/// Write-ahead marker recorded before the first side effect of an
/// ingestion and cleared after the last.
///
/// A marker that survives a crash identifies a partial addition: some of
/// raw file, chunk files, vector rows and BM25 index may exist while the
/// user aggregate was never updated. The recovery pass lists these so an
/// operator (or a cleanup job) can complete or discard them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestIntent {
    pub username: String,
    pub kb_name: String,
    pub doc_name: String,
    pub source: String,
    /// SHA-256 of the raw content, to match the marker against the bytes
    /// actually found on disk during recovery
    pub content_sha256: String,
    pub started_at: DateTime<Utc>,
}

impl IngestIntent {
    pub fn new(raw_doc: &RawDocument, username: &str, kb_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&raw_doc.content);
        let content_sha256 = format!("{:x}", hasher.finalize());

        Self {
            username: username.to_string(),
            kb_name: kb_name.to_string(),
            doc_name: raw_doc.name.clone(),
            source: raw_doc.source.clone(),
            content_sha256,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_hashes_content() {
        let raw = RawDocument::new("paper.pdf", "upload", b"some bytes".to_vec());
        let intent = IngestIntent::new(&raw, "alice", "research");

        assert_eq!(intent.doc_name, "paper.pdf");
        assert_eq!(intent.content_sha256.len(), 64);

        // Same content, same hash
        let again = IngestIntent::new(&raw, "alice", "research");
        assert_eq!(intent.content_sha256, again.content_sha256);

        // Different content, different hash
        let other = RawDocument::new("paper.pdf", "upload", b"other bytes".to_vec());
        let other_intent = IngestIntent::new(&other, "alice", "research");
        assert_ne!(intent.content_sha256, other_intent.content_sha256);
    }
}
