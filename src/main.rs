use anyhow::Result;
use kbrag::bm25::Bm25Service;
use kbrag::config::Config;
use kbrag::context::{ContextGenerator, OpenAiContextGenerator, PassthroughContext};
use kbrag::db::{migrate, Db};
use kbrag::embeddings::{EmbeddingCache, OpenAiEmbedder};
use kbrag::http::HttpServer;
use kbrag::kb::KnowledgeBaseService;
use kbrag::locations::Locations;
use kbrag::parse::PdfParser;
use kbrag::storage::FileStore;
use kbrag::users::JsonUserStore;
use kbrag::vectordb::VectorDb;
use std::sync::Arc;

/// Build the configured embedder with an optional LRU query-embedding cache.
fn build_embedder(config: &Config) -> Result<OpenAiEmbedder> {
    let api_key = std::env::var(&config.embeddings.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable {} not set. Set it in your .env file or as an environment variable.",
            config.embeddings.api_key_env
        )
    })?;

    // LRU cache avoids re-embedding repeated queries
    let cache = if config.embeddings.cache_capacity > 0 {
        Some(Arc::new(EmbeddingCache::new(config.embeddings.cache_capacity)))
    } else {
        None
    };

    Ok(OpenAiEmbedder::new(
        api_key,
        config.embeddings.model.clone(),
        config.embeddings.batch_size,
        config.embeddings.dimensions,
        cache,
    ))
}

fn build_context_generator(config: &Config) -> Result<Arc<dyn ContextGenerator>> {
    if !config.context.enabled {
        return Ok(Arc::new(PassthroughContext));
    }
    let api_key = std::env::var(&config.context.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable {} not set but context.enabled = true.",
            config.context.api_key_env
        )
    })?;
    Ok(Arc::new(OpenAiContextGenerator::new(api_key, &config.context)))
}

async fn build_service(config: &Config) -> Result<(Arc<KnowledgeBaseService>, Arc<Db>)> {
    let db = Arc::new(Db::new(config.db_path()));
    db.with_connection(migrate::run_migrations).await?;
    log::info!("Database initialized successfully");

    let locations = Locations::new(config.base_dir());
    let store = FileStore::new();
    let embedder = Arc::new(build_embedder(config)?);
    let context = build_context_generator(config)?;

    let service = Arc::new(KnowledgeBaseService::new(
        Arc::new(JsonUserStore::new(store.clone(), locations.clone())),
        store.clone(),
        locations.clone(),
        Arc::new(PdfParser::new(config.chunking.clone())),
        context,
        VectorDb::new(Arc::clone(&db), embedder),
        Bm25Service::new(store, locations),
    ));
    Ok((service, db))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "recover" => {
            let username = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Usage: kbrag recover <username> <kb_name>"))?;
            let kb_name = args
                .get(3)
                .ok_or_else(|| anyhow::anyhow!("Usage: kbrag recover <username> <kb_name>"))?;
            run_recover(username, kb_name).await?;
        }
        _ => {
            run_server().await?;
        }
    }

    Ok(())
}

/// Run the HTTP API server.
async fn run_server() -> Result<()> {
    log::info!("Starting kbrag v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Storage root: {}", config.base_dir().display());
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Embedding model: {}", config.embeddings.model);

    let (service, db) = build_service(&config).await?;
    let server = HttpServer::new(service, db, &config);
    server.run(config.http_server.port).await?;

    Ok(())
}

/// List ingestions that started but never completed for one knowledge
/// base, so an operator can clean up or retry them.
async fn run_recover(username: &str, kb_name: &str) -> Result<()> {
    let config = Config::load()?;
    let (service, _db) = build_service(&config).await?;

    let pending = service.incomplete_ingestions(username, kb_name).await?;
    if pending.is_empty() {
        log::info!("No incomplete ingestions for {}/{}", username, kb_name);
        return Ok(());
    }

    for intent in &pending {
        log::warn!(
            "Incomplete ingestion: {} (source {}, started {}, sha256 {})",
            intent.doc_name,
            intent.source,
            intent.started_at,
            intent.content_sha256
        );
    }
    log::info!(
        "{} incomplete ingestion(s) found. Re-upload the document(s) after \
         clearing their partial artifacts, or remove the markers under .intents/.",
        pending.len()
    );

    match service.verify_consistency(username, kb_name).await {
        Ok(report) if report.is_consistent() => {
            log::info!("BM25 index is consistent with the chunks on disk");
        }
        Ok(report) => {
            for doc in &report.stale_in_index {
                log::warn!("Indexed document has missing or changed chunks on disk: {}", doc);
            }
            for doc in &report.missing_from_index {
                log::warn!("Document has chunks on disk but is not indexed: {}", doc);
            }
        }
        Err(kbrag::KbragError::NotFound(_)) => {
            log::info!("No BM25 index exists yet for {}/{}", username, kb_name);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
