//! Knowledge base orchestration: composes the location resolver, file
//! storage, parser, context service, vector store, user repository and
//! BM25 service into the single `add_document` use case, plus the search
//! passthroughs the API exposes.

pub mod intent;

pub use intent::IngestIntent;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::bm25::{Bm25Hit, Bm25Service, ConsistencyReport};
use crate::context::ContextGenerator;
use crate::domain::{is_safe_doc_name, Document, RawDocument};
use crate::error::{KbragError, Result};
use crate::locations::Locations;
use crate::parse::DocumentParser;
use crate::storage::FileStore;
use crate::users::UserStore;
use crate::vectordb::{ChunkHit, VectorDb};

/// Per-key async mutexes, used to serialize writes per (user, kb).
///
/// Without this, two concurrent `add_document` calls for the same
/// knowledge base could both pass the duplicate-name check and both
/// append, and the aggregate write would be last-writer-wins.
struct KeyedLocks {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        // A strong count of 1 means only the map holds the entry; no task
        // is using or waiting on it, so it can go
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

/// The document-ingestion orchestration service.
pub struct KnowledgeBaseService {
    users: Arc<dyn UserStore>,
    store: FileStore,
    locations: Locations,
    parser: Arc<dyn DocumentParser>,
    context: Arc<dyn ContextGenerator>,
    vectordb: VectorDb,
    bm25: Bm25Service,
    write_locks: KeyedLocks,
}

impl KnowledgeBaseService {
    pub fn new(
        users: Arc<dyn UserStore>,
        store: FileStore,
        locations: Locations,
        parser: Arc<dyn DocumentParser>,
        context: Arc<dyn ContextGenerator>,
        vectordb: VectorDb,
        bm25: Bm25Service,
    ) -> Self {
        Self {
            users,
            store,
            locations,
            parser,
            context,
            vectordb,
            bm25,
            write_locks: KeyedLocks::new(),
        }
    }

    /// Ingest one raw document into a user's knowledge base.
    ///
    /// Strictly ordered: validate (user/KB exist, PDF type, name unique) →
    /// record intent → save raw bytes → parse to text and markdown →
    /// contextualize → persist chunks → upsert into the vector store →
    /// append the Document record and persist the user aggregate → rebuild
    /// the BM25 index → clear intent.
    ///
    /// Validation failures happen before any side effect. Later failures
    /// propagate without rollback; already-applied side effects stay in
    /// place and the intent marker stays behind so
    /// [`incomplete_ingestions`](Self::incomplete_ingestions) can surface
    /// the partial addition.
    pub async fn add_document(
        &self,
        raw_doc: RawDocument,
        username: &str,
        kb_name: &str,
    ) -> Result<Document> {
        // Serialize writes per (user, kb)
        let lock = self
            .write_locks
            .lock_for(&format!("{}/{}", username, kb_name));
        let _guard = lock.lock().await;

        // Preconditions, in order: existence, file type, uniqueness
        let mut user = self.users.retrieve(username).await?;
        let kb = user.knowledge_base(kb_name).ok_or_else(|| {
            KbragError::NotFound(format!(
                "Knowledge base {} does not exist for user {}",
                kb_name, username
            ))
        })?;

        // The name is joined into filesystem paths; traversal sequences
        // must never reach the location resolver
        if !is_safe_doc_name(&raw_doc.name) {
            return Err(KbragError::Validation(format!(
                "Invalid document name: {:?}",
                raw_doc.name
            )));
        }

        if !raw_doc.is_pdf() {
            return Err(KbragError::Validation(format!(
                "The document {} is not a PDF file",
                raw_doc.name
            )));
        }

        if kb.document_exists(&raw_doc.name) {
            return Err(KbragError::Conflict(format!(
                "The document {} already exists in the knowledge base '{}'",
                raw_doc.name, kb_name
            )));
        }

        let doc_name = raw_doc.name.clone();
        log::info!(
            "Ingesting {} into {}/{} ({} bytes)",
            doc_name,
            username,
            kb_name,
            raw_doc.content.len()
        );

        // Storage locations
        let raw_doc_path = self.locations.raw_doc_path(username, kb_name, &doc_name);
        let text_chunks_dir = self.locations.text_chunks_dir(username, kb_name, &doc_name);
        let md_chunks_dir = self.locations.md_chunks_dir(username, kb_name, &doc_name);

        // Write-ahead intent marker: recorded before the first side effect
        let intent = IngestIntent::new(&raw_doc, username, kb_name);
        let intent_path = self.locations.intent_path(username, kb_name, &doc_name);
        self.store.write_json_atomic(&intent_path, &intent).await?;

        // Raw bytes
        self.store.save_raw(&raw_doc.content, &raw_doc_path).await?;

        // Parse both renditions
        let (full_text, text_chunks) = self.parser.parse_to_text(&raw_doc.content).await?;
        let (full_md, md_chunks) = self.parser.parse_to_markdown(&raw_doc).await?;

        // Contextualize
        let ctx_text_chunks = self
            .context
            .create_context_chunks(&full_text, &text_chunks)
            .await?;
        let ctx_md_chunks = self
            .context
            .create_context_chunks(&full_md, &md_chunks)
            .await?;

        // Persist contextualized chunks to file storage
        self.store
            .save_text_chunks(&ctx_text_chunks, &text_chunks_dir)
            .await?;
        self.store.save_md_chunks(&ctx_md_chunks, &md_chunks_dir).await?;

        // Upsert text chunks into the vector store
        self.vectordb
            .save_chunks(&ctx_text_chunks, kb_name, &doc_name)
            .await?;

        // Append the document record and persist the whole aggregate
        let document = Document::new(doc_name.clone(), raw_doc.source.clone());
        user.knowledge_base_mut(kb_name)
            .ok_or_else(|| {
                KbragError::NotFound(format!(
                    "Knowledge base {} does not exist for user {}",
                    kb_name, username
                ))
            })?
            .add_document(document.clone())?;
        self.users.persist(&user).await?;

        // Rebuild the BM25 index from the chunks now on disk
        self.bm25.update_index(username, kb_name).await?;

        // Ingestion complete; clear the intent marker
        tokio::fs::remove_file(&intent_path).await?;

        log::info!(
            "Document {} added to knowledge base {}/{} ({} text chunks)",
            document.name,
            username,
            kb_name,
            ctx_text_chunks.len()
        );
        Ok(document)
    }

    /// Top-k similar chunks for a query against a knowledge base.
    pub async fn similarity_search(
        &self,
        query: &str,
        kb_name: &str,
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        self.vectordb.similarity_search(query, kb_name, k).await
    }

    /// Top-k similar chunks with cosine-similarity scores, descending.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        kb_name: &str,
        k: usize,
    ) -> Result<Vec<(ChunkHit, f32)>> {
        self.vectordb
            .similarity_search_with_score(query, kb_name, k)
            .await
    }

    /// BM25 keyword search against a knowledge base's persisted index.
    pub async fn keyword_search(
        &self,
        username: &str,
        kb_name: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Bm25Hit>> {
        self.bm25.search(username, kb_name, query, k).await
    }

    /// Total chunk count in the knowledge base's vector collection (chunks,
    /// not documents).
    pub async fn kb_chunk_count(&self, kb_name: &str) -> Result<usize> {
        self.vectordb.kb_chunk_count(kb_name).await
    }

    /// Compare the persisted BM25 index against the chunks on disk.
    pub async fn verify_consistency(
        &self,
        username: &str,
        kb_name: &str,
    ) -> Result<ConsistencyReport> {
        self.bm25.verify_consistency(username, kb_name).await
    }

    /// List intent markers left behind by ingestions that never completed.
    pub async fn incomplete_ingestions(
        &self,
        username: &str,
        kb_name: &str,
    ) -> Result<Vec<IngestIntent>> {
        let dir = self.locations.intents_dir(username, kb_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut intents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                let intent: IngestIntent = self.store.read_json(&entry.path()).await?;
                intents.push(intent);
            }
        }
        intents.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(intents)
    }

    /// Drop an intent marker after its partial addition has been dealt
    /// with.
    pub async fn clear_intent(
        &self,
        username: &str,
        kb_name: &str,
        doc_name: &str,
    ) -> Result<()> {
        let path = self.locations.intent_path(username, kb_name, doc_name);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
