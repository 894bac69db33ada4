use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kbrag: KbragConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KbragConfig {
    /// Root directory for all per-user knowledge-base storage.
    /// Raw documents, chunk files, BM25 indexes and user aggregates all
    /// live under deterministic paths below this directory.
    pub base_dir: PathBuf,
    /// Path to the SQLite database backing the vector collections.
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    1000
}

/// Contextualization (chunk enrichment) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// When disabled, chunks pass through unenriched instead of calling
    /// the text-generation API.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_context_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_context_max_retries")]
    pub max_retries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_context_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_context_max_retries(),
        }
    }
}

fn default_context_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_context_max_retries() -> usize {
    3
}

/// Chunk boundary policy for the PDF parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// One chunk per extracted page; falls back to windowing when the
    /// extractor emits no page breaks.
    Page,
    /// Fixed-size character windows with overlap.
    Window,
}

/// Chunking configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_policy")]
    pub policy: ChunkPolicy,
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            policy: default_chunk_policy(),
            window_chars: default_window_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_policy() -> ChunkPolicy {
    ChunkPolicy::Page
}

fn default_window_chars() -> usize {
    1200
}

fn default_overlap_chars() -> usize {
    200
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KBRAG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env file is optional; ignore errors
        let _ = dotenv::dotenv();

        let config_path = std::env::var("KBRAG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.kbrag.base_dir.exists() {
            anyhow::bail!(
                "base_dir path does not exist: {}. Set base_dir in config.toml to your storage directory.",
                self.kbrag.base_dir.display()
            );
        }

        if !self.kbrag.base_dir.is_dir() {
            anyhow::bail!(
                "base_dir must be a directory, not a file: {}",
                self.kbrag.base_dir.display()
            );
        }

        // Check both environment variable and .env file (dotenv already loaded in Config::load)
        std::env::var(&self.embeddings.api_key_env)
            .with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                    self.embeddings.api_key_env
                )
            })?;

        if self.search.default_k == 0 {
            anyhow::bail!("search.default_k must be greater than 0");
        }

        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.chunking.window_chars == 0 {
            anyhow::bail!("chunking.window_chars must be greater than 0");
        }

        if self.chunking.overlap_chars >= self.chunking.window_chars {
            anyhow::bail!("chunking.overlap_chars must be less than window_chars");
        }

        Ok(())
    }

    /// Get the storage root path
    pub fn base_dir(&self) -> &Path {
        &self.kbrag.base_dir
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.kbrag.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide cwd and env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn create_test_config(temp_dir: &TempDir) -> String {
        let base_dir = temp_dir.path().canonicalize().unwrap();
        let base_dir_str = base_dir.to_str().unwrap().replace('\\', "\\\\");
        format!(
            r#"
[kbrag]
base_dir = "{}"
db_path = "./test.db"
log_level = "debug"

[embeddings]
provider = "openai"
model = "text-embedding-3-small"
api_key_env = "OPENAI_API_KEY"
batch_size = 100
dimensions = 1536

[context]
enabled = false

[chunking]
policy = "page"
window_chars = 1200
overlap_chars = 200

[search]
default_k = 10
"#,
            base_dir_str
        )
    }

    /// Restores cwd when dropped (e.g. on panic).
    struct CwdGuard(std::path::PathBuf);
    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn with_config_env(config_path: &std::path::Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("KBRAG_CONFIG").ok();
        let original_key = std::env::var("OPENAI_API_KEY").ok();
        std::env::set_var("KBRAG_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("OPENAI_API_KEY", k),
            None => std::env::remove_var("OPENAI_API_KEY"),
        }
        f();
        std::env::remove_var("KBRAG_CONFIG");
        std::env::remove_var("OPENAI_API_KEY");
        if let Some(val) = original_config {
            std::env::set_var("KBRAG_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("OPENAI_API_KEY", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_content = create_test_config(&temp_dir);
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, config_content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir.clone());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.kbrag.log_level, "debug");
            assert_eq!(config.search.default_k, 10);
            assert_eq!(config.chunking.policy, ChunkPolicy::Page);
            assert_eq!(config.embeddings.batch_size, 100);
            // Context section defaults apply when fields are omitted
            assert!(!config.context.enabled);
            assert_eq!(config.context.max_retries, 3);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_content = create_test_config(&temp_dir);
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, config_content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir.clone());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains("OPENAI_API_KEY"));
        });
    }

    #[test]
    fn test_config_rejects_overlap_ge_window() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_content = create_test_config(&temp_dir)
            .replace("overlap_chars = 200", "overlap_chars = 1200");
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, config_content).unwrap();
        let config_path = config_path.canonicalize().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let _cwd = CwdGuard(original_dir.clone());
        std::env::set_current_dir(temp_dir.path()).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_err());
            assert!(config.unwrap_err().to_string().contains("overlap_chars"));
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("KBRAG_CONFIG").ok();
        std::env::set_var("KBRAG_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("KBRAG_CONFIG");
        if let Some(v) = original {
            std::env::set_var("KBRAG_CONFIG", v);
        }
    }
}
