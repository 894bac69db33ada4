use std::path::{Path, PathBuf};

use crate::domain::doc_stem;

/// Filename of the persisted BM25 index inside a knowledge-base directory.
pub const BM25_INDEX_FILENAME: &str = "knowledge_base_bm25_index.json";

/// Filename of the persisted user aggregate inside a user directory.
pub const USER_FILENAME: &str = "user.json";

/// Deterministic path layout for everything a knowledge base owns.
///
/// All paths are pure functions of (username, kb name, doc name) rooted
/// under a single base directory:
///
/// ```text
/// <base>/<user>/user.json
/// <base>/<user>/<kb>/raw/pdf/<doc_name>
/// <base>/<user>/<kb>/md_chunks/<doc_stem>/
/// <base>/<user>/<kb>/text_chunks/<doc_stem>/
/// <base>/<user>/<kb>/knowledge_base_bm25_index.json
/// <base>/<user>/<kb>/.intents/<doc_name>.json
/// ```
///
/// No I/O happens here; the resolver only computes paths, so repeated calls
/// for the same identifiers always agree and distinct knowledge bases never
/// collide.
#[derive(Debug, Clone)]
pub struct Locations {
    base: PathBuf,
}

impl Locations {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn user_dir(&self, username: &str) -> PathBuf {
        self.base.join(username)
    }

    /// Path of the persisted user aggregate.
    pub fn user_file(&self, username: &str) -> PathBuf {
        self.user_dir(username).join(USER_FILENAME)
    }

    pub fn kb_dir(&self, username: &str, kb_name: &str) -> PathBuf {
        self.user_dir(username).join(kb_name)
    }

    /// Where the raw uploaded bytes of a document are stored.
    pub fn raw_doc_path(&self, username: &str, kb_name: &str, doc_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name)
            .join("raw")
            .join("pdf")
            .join(doc_name)
    }

    /// Directory holding one markdown chunk file per chunk of a document.
    pub fn md_chunks_dir(&self, username: &str, kb_name: &str, doc_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name)
            .join("md_chunks")
            .join(doc_stem(doc_name))
    }

    /// Directory holding one text chunk file per chunk of a document.
    pub fn text_chunks_dir(&self, username: &str, kb_name: &str, doc_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name)
            .join("text_chunks")
            .join(doc_stem(doc_name))
    }

    /// Parent directory of all text-chunk directories of a knowledge base;
    /// scanned by the BM25 rebuild and the consistency check.
    pub fn text_chunks_root(&self, username: &str, kb_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name).join("text_chunks")
    }

    pub fn bm25_index_path(&self, username: &str, kb_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name).join(BM25_INDEX_FILENAME)
    }

    /// Directory of write-ahead intent markers for in-flight ingestions.
    pub fn intents_dir(&self, username: &str, kb_name: &str) -> PathBuf {
        self.kb_dir(username, kb_name).join(".intents")
    }

    pub fn intent_path(&self, username: &str, kb_name: &str, doc_name: &str) -> PathBuf {
        self.intents_dir(username, kb_name)
            .join(format!("{}.json", doc_name))
    }
}
