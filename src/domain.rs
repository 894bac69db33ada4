use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KbragError, Result};

/// Metadata record for an ingested document.
///
/// Immutable once created; the content itself lives in file storage and
/// the vector collection, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub doc_id: Uuid,
    /// Filename with extension, unique within a knowledge base
    pub name: String,
    /// Where the document came from (upload, URL, sync job, ...)
    pub source: String,
    pub added_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            doc_id: Uuid::new_v4(),
            name: name.into(),
            source: source.into(),
            added_at: Utc::now(),
        }
    }
}

/// The inbound artifact for one ingestion call. Transient; never persisted
/// as-is.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub source: String,
    pub content: Vec<u8>,
}

impl RawDocument {
    pub fn new(name: impl Into<String>, source: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            content,
        }
    }

    /// File-type check used by the ingestion preconditions. PDF is the only
    /// accepted type.
    pub fn is_pdf(&self) -> bool {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    }

    /// Document name without its extension; used for chunk directory paths.
    pub fn stem(&self) -> String {
        doc_stem(&self.name)
    }
}

/// Strip the extension from a document name.
pub fn doc_stem(doc_name: &str) -> String {
    std::path::Path::new(doc_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(doc_name)
        .to_string()
}

/// Document names become single path components under the knowledge-base
/// directory. Separators, parent references and NUL bytes would let a name
/// escape that directory, so they are rejected up front.
pub fn is_safe_doc_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// A named collection of ingested documents belonging to one user.
///
/// Documents are keyed by name; no two documents in the same knowledge base
/// may share a name. Documents are appended, never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: Vec::new(),
        }
    }

    /// Case-insensitive: names differing only in case would share chunk
    /// directory stems, so `a.pdf` and `a.PDF` count as the same document.
    pub fn document_exists(&self, doc_name: &str) -> bool {
        self.documents
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(doc_name))
    }

    /// Append a document record, enforcing the name-uniqueness invariant.
    pub fn add_document(&mut self, document: Document) -> Result<()> {
        if self.document_exists(&document.name) {
            return Err(KbragError::Conflict(format!(
                "The document {} already exists in the knowledge base '{}'",
                document.name, self.name
            )));
        }
        self.documents.push(document);
        Ok(())
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

/// The user aggregate: identity plus owned knowledge bases.
///
/// Mutated only via repository round-trip: load, mutate in memory, persist
/// the whole aggregate back. No partial updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBase>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            knowledge_bases: Vec::new(),
        }
    }

    pub fn knowledge_base(&self, kb_name: &str) -> Option<&KnowledgeBase> {
        self.knowledge_bases.iter().find(|kb| kb.name == kb_name)
    }

    pub fn knowledge_base_mut(&mut self, kb_name: &str) -> Option<&mut KnowledgeBase> {
        self.knowledge_bases.iter_mut().find(|kb| kb.name == kb_name)
    }

    pub fn add_knowledge_base(&mut self, kb: KnowledgeBase) -> Result<()> {
        if self.knowledge_base(&kb.name).is_some() {
            return Err(KbragError::Conflict(format!(
                "Knowledge base {} already exists for user {}",
                kb.name, self.username
            )));
        }
        self.knowledge_bases.push(kb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_document_is_pdf() {
        let doc = RawDocument::new("paper.pdf", "upload", vec![1, 2, 3]);
        assert!(doc.is_pdf());

        let doc = RawDocument::new("paper.PDF", "upload", vec![]);
        assert!(doc.is_pdf());

        let doc = RawDocument::new("notes.txt", "upload", vec![]);
        assert!(!doc.is_pdf());

        let doc = RawDocument::new("no_extension", "upload", vec![]);
        assert!(!doc.is_pdf());
    }

    #[test]
    fn test_doc_stem() {
        assert_eq!(doc_stem("paper.pdf"), "paper");
        assert_eq!(doc_stem("report.v2.pdf"), "report.v2");
        assert_eq!(doc_stem("no_extension"), "no_extension");
    }

    #[test]
    fn test_is_safe_doc_name() {
        assert!(is_safe_doc_name("paper.pdf"));
        assert!(is_safe_doc_name("report.v2.pdf"));
        assert!(is_safe_doc_name("..leading-dots.pdf"));

        assert!(!is_safe_doc_name(""));
        assert!(!is_safe_doc_name("."));
        assert!(!is_safe_doc_name(".."));
        assert!(!is_safe_doc_name("../../../escape.pdf"));
        assert!(!is_safe_doc_name("nested/paper.pdf"));
        assert!(!is_safe_doc_name("nested\\paper.pdf"));
        assert!(!is_safe_doc_name("paper\0.pdf"));
    }

    #[test]
    fn test_kb_document_uniqueness_ignores_case() {
        let mut kb = KnowledgeBase::new("research");
        kb.add_document(Document::new("paper.pdf", "upload")).unwrap();

        assert!(kb.document_exists("paper.pdf"));
        assert!(kb.document_exists("Paper.PDF"));

        // Same stem, different case: would overwrite the first document's
        // chunk directories, so it must conflict
        let err = kb.add_document(Document::new("PAPER.pdf", "upload")).unwrap_err();
        assert!(matches!(err, KbragError::Conflict(_)));
        assert_eq!(kb.document_count(), 1);
    }

    #[test]
    fn test_kb_add_document_enforces_uniqueness() {
        let mut kb = KnowledgeBase::new("research");
        kb.add_document(Document::new("paper.pdf", "upload")).unwrap();
        assert_eq!(kb.document_count(), 1);

        let err = kb.add_document(Document::new("paper.pdf", "upload")).unwrap_err();
        assert!(matches!(err, KbragError::Conflict(_)));
        assert_eq!(kb.document_count(), 1);
    }

    #[test]
    fn test_user_kb_lookup() {
        let mut user = User::new("alice");
        user.add_knowledge_base(KnowledgeBase::new("research")).unwrap();

        assert!(user.knowledge_base("research").is_some());
        assert!(user.knowledge_base("missing").is_none());

        let err = user.add_knowledge_base(KnowledgeBase::new("research")).unwrap_err();
        assert!(matches!(err, KbragError::Conflict(_)));
    }

    #[test]
    fn test_user_aggregate_round_trips_through_json() {
        let mut user = User::new("alice");
        let mut kb = KnowledgeBase::new("research");
        kb.add_document(Document::new("paper.pdf", "upload")).unwrap();
        user.add_knowledge_base(kb).unwrap();

        let json = serde_json::to_string(&user).unwrap();
        let restored: User = serde_json::from_str(&json).unwrap();
        assert_eq!(user, restored);
    }
}
