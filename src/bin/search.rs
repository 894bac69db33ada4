use anyhow::Result;
use clap::Parser;
use kbrag::bm25::Bm25Service;
use kbrag::config::Config;
use kbrag::locations::Locations;
use kbrag::storage::FileStore;
use kbrag::vectordb::VectorDb;
use kbrag::db::{migrate, Db};
use kbrag::embeddings::{EmbeddingCache, OpenAiEmbedder};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Search a knowledge base (vector similarity or BM25 keyword)")]
struct Args {
    /// Owner of the knowledge base
    #[arg(short, long)]
    username: String,

    /// Knowledge base name
    #[arg(short, long)]
    kb_name: String,

    /// Query text
    query: String,

    /// Number of results to return (defaults to search.default_k)
    #[arg(long)]
    k: Option<usize>,

    /// Use the BM25 keyword index instead of vector similarity
    #[arg(long)]
    keyword: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let k = args.k.unwrap_or(config.search.default_k);

    if args.keyword {
        let locations = Locations::new(config.base_dir());
        let bm25 = Bm25Service::new(FileStore::new(), locations);
        let hits = bm25
            .search(&args.username, &args.kb_name, &args.query, k)
            .await?;
        if hits.is_empty() {
            println!("No results.");
            return Ok(());
        }
        for (rank, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} #{}\n   {}",
                rank + 1,
                hit.score,
                hit.doc,
                hit.chunk_number,
                preview(&hit.chunk_text)
            );
        }
        return Ok(());
    }

    let db = Arc::new(Db::new(config.db_path()));
    db.with_connection(migrate::run_migrations).await?;

    let api_key = std::env::var(&config.embeddings.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable {} not set",
            config.embeddings.api_key_env
        )
    })?;
    let cache = if config.embeddings.cache_capacity > 0 {
        Some(Arc::new(EmbeddingCache::new(config.embeddings.cache_capacity)))
    } else {
        None
    };
    let embedder = Arc::new(OpenAiEmbedder::new(
        api_key,
        config.embeddings.model.clone(),
        config.embeddings.batch_size,
        config.embeddings.dimensions,
        cache,
    ));

    let vectordb = VectorDb::new(db, embedder);
    let hits = vectordb
        .similarity_search_with_score(&args.query, &args.kb_name, k)
        .await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, (hit, score)) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{}\n   {}",
            rank + 1,
            score,
            hit.filename,
            hit.chunk_number,
            preview(&hit.chunk_text)
        );
    }

    Ok(())
}

/// First line of the chunk, truncated for terminal output.
fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let mut preview: String = first_line.chars().take(120).collect();
    if preview.len() < first_line.len() {
        preview.push('…');
    }
    preview
}
