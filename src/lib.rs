//! kbrag: per-user knowledge-base document ingestion and hybrid retrieval.
//!
//! Documents are ingested as PDFs, parsed into text and markdown chunks,
//! optionally enriched with surrounding-document context, and indexed two
//! ways: embeddings in a SQLite-backed vector store for similarity search,
//! and a per-knowledge-base Okapi BM25 index for keyword search. All file
//! artifacts live under a deterministic path layout rooted at a single
//! base directory.

pub mod bm25;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod embeddings;
pub mod error;
pub mod http;
pub mod kb;
pub mod locations;
pub mod parse;
pub mod storage;
pub mod users;
pub mod vectordb;

pub use config::Config;
pub use error::{KbragError, Result};
