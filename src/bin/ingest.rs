use anyhow::Result;
use clap::Parser;
use kbrag::bm25::Bm25Service;
use kbrag::config::Config;
use kbrag::context::{ContextGenerator, OpenAiContextGenerator, PassthroughContext};
use kbrag::db::{migrate, Db};
use kbrag::domain::RawDocument;
use kbrag::embeddings::{EmbeddingCache, OpenAiEmbedder};
use kbrag::kb::KnowledgeBaseService;
use kbrag::locations::Locations;
use kbrag::parse::PdfParser;
use kbrag::storage::FileStore;
use kbrag::users::JsonUserStore;
use kbrag::vectordb::VectorDb;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest a PDF document into a user's knowledge base")]
struct Args {
    /// Owner of the knowledge base
    #[arg(short, long)]
    username: String,

    /// Knowledge base name
    #[arg(short, long)]
    kb_name: String,

    /// Path to the PDF file to ingest
    file: PathBuf,

    /// Source label recorded on the document
    #[arg(short, long, default_value = "cli")]
    source: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;

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

    let context: Arc<dyn ContextGenerator> = if config.context.enabled {
        let key = std::env::var(&config.context.api_key_env).map_err(|_| {
            anyhow::anyhow!("Environment variable {} not set", config.context.api_key_env)
        })?;
        Arc::new(OpenAiContextGenerator::new(key, &config.context))
    } else {
        Arc::new(PassthroughContext)
    };

    let locations = Locations::new(config.base_dir());
    let store = FileStore::new();
    let service = KnowledgeBaseService::new(
        Arc::new(JsonUserStore::new(store.clone(), locations.clone())),
        store.clone(),
        locations.clone(),
        Arc::new(PdfParser::new(config.chunking.clone())),
        context,
        VectorDb::new(db, embedder),
        Bm25Service::new(store, locations),
    );

    let doc_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid file path: {}", args.file.display()))?
        .to_string();
    let content = std::fs::read(&args.file)?;
    log::info!(
        "Ingesting {} ({} bytes) into {}/{}",
        doc_name,
        content.len(),
        args.username,
        args.kb_name
    );

    let raw = RawDocument::new(doc_name, args.source, content);
    let document = service
        .add_document(raw, &args.username, &args.kb_name)
        .await?;

    log::info!("Added document {} (id {})", document.name, document.doc_id);
    Ok(())
}
