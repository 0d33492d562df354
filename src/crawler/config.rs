use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::crawler::errors::{ConfigurationError, CrawlerResult};
use crate::crawler::product::SiteIdentity;
use crate::crawler::selectors::SelectorConfig;

/// Main configuration structure for the catalog crawler
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Target site and the category pages to walk
    pub site: SiteConfig,
    /// Browser settings and page timing
    pub renderer: RendererConfig,
    /// Backpressure against the source site
    pub pacing: PacingConfig,
    /// Image embedding service
    pub embedding: EmbeddingConfig,
    /// Where records are upserted
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Markup selectors for product fields
    pub selectors: SelectorConfig,
    /// Cap on products taken from each category (test and demo runs)
    pub max_products_per_category: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub source: String,
    pub brand: String,
    /// Path segment that identifies product detail links
    pub product_path_marker: String,
    pub category_urls: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RendererConfig {
    pub headless: bool,
    pub chrome_executable: Option<String>,
    pub user_data_dir: Option<String>,
    pub user_agent: String,
    pub category_timeout_ms: u64,
    pub product_timeout_ms: u64,
    /// Pause after a category page settles, before scrolling
    pub category_settle_ms: u64,
    /// Pause after a product page reaches DOM ready
    pub product_settle_ms: u64,
    /// Pause after each scroll for lazy-loaded tiles
    pub scroll_settle_ms: u64,
    pub max_scroll_attempts: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PacingConfig {
    pub product_delay_ms: u64,
    /// Used instead of `product_delay_ms` after an unexpected product error
    pub error_delay_ms: u64,
    pub category_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Image embedding service; embeddings are skipped when unset
    pub endpoint: Option<String>,
    pub dimension: usize,
    pub fetch_timeout_secs: u64,
    /// Images larger than this are not sent to the provider
    pub max_image_bytes: u64,
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    Supabase,
    DryRun,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub table: String,
}

/// Configuration for logging behavior
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to mirror log lines into `log_file`
    pub enable_file_logging: bool,
    pub log_file: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ae.com".to_string(),
            source: "scraper".to_string(),
            brand: "American Eagle".to_string(),
            product_path_marker: "/p/".to_string(),
            category_urls: vec!["https://www.ae.com/us/en/c/men/mens?pagetype=clp".to_string()],
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            user_data_dir: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            category_timeout_ms: 60_000,
            product_timeout_ms: 90_000,
            category_settle_ms: 3_000,
            product_settle_ms: 3_000,
            scroll_settle_ms: 2_000,
            max_scroll_attempts: 50,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            product_delay_ms: 1_000,
            error_delay_ms: 2_000,
            category_delay_ms: 3_000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            dimension: 768,
            fetch_timeout_secs: 30,
            max_image_bytes: 10 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: "data/products.sqlite".to_string(),
            endpoint: None,
            api_key: None,
            table: "products".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_file_logging: false,
            log_file: "crawler.log".to_string(),
        }
    }
}

const CANDIDATE_PATHS: [&str; 2] = ["config/crawler.yaml", "crawler.yaml"];
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl CrawlerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_yaml(file_path: &str) -> CrawlerResult<Self> {
        if !Path::new(file_path).exists() {
            return Err(ConfigurationError::FileNotFound(file_path.to_string()).into());
        }
        let config_content = std::fs::read_to_string(file_path)?;
        let config: CrawlerConfig = serde_yaml::from_str(&config_content)?;
        Ok(config)
    }

    /// Load the first candidate file under the working directory.
    /// Only a missing file falls back to defaults; an unreadable or malformed one is an error.
    pub fn discover() -> CrawlerResult<Self> {
        Self::discover_in(Path::new("."))
    }

    pub fn discover_in(root: &Path) -> CrawlerResult<Self> {
        let found = CANDIDATE_PATHS
            .iter()
            .map(|p| root.join(p))
            .find(|p| p.exists());

        match found {
            Some(path) => {
                let path = path.to_string_lossy().into_owned();
                let config = Self::load_from_yaml(&path)?;
                log::info!("Loaded configuration from {}", path);
                Ok(config)
            }
            None => {
                log::info!("No configuration file found, using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml(&self, file_path: &str) -> CrawlerResult<()> {
        let yaml_content = serde_yaml::to_string(self)?;

        if let Some(parent) = PathBuf::from(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(file_path, yaml_content)?;
        Ok(())
    }

    /// Secrets and machine-specific paths come from the environment when set
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SUPABASE_URL") {
            self.store.endpoint = Some(url);
        }
        if let Some(key) = lookup("SUPABASE_KEY") {
            self.store.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = Some(endpoint);
        }
        if let Some(exe) = lookup("CHROME_EXECUTABLE") {
            self.renderer.chrome_executable = Some(exe);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let base = parse_http_url(&self.site.base_url)
            .ok_or_else(|| ConfigurationError::ValidationFailed(format!("site.base_url is not an HTTP(S) URL: {}", self.site.base_url)))?;
        if base.host_str().is_none() {
            return Err(ConfigurationError::ValidationFailed("site.base_url has no host".to_string()));
        }

        if self.site.category_urls.is_empty() {
            return Err(ConfigurationError::MissingRequiredField("site.category_urls".to_string()));
        }
        for url in &self.site.category_urls {
            if parse_http_url(url).is_none() {
                return Err(ConfigurationError::ValidationFailed(format!("Invalid category URL: {}", url)));
            }
        }

        if self.site.product_path_marker.trim().is_empty() {
            return Err(ConfigurationError::MissingRequiredField("site.product_path_marker".to_string()));
        }
        if self.site.source.trim().is_empty() {
            return Err(ConfigurationError::MissingRequiredField("site.source".to_string()));
        }

        if self.renderer.max_scroll_attempts == 0 {
            return Err(ConfigurationError::ValidationFailed("renderer.max_scroll_attempts must be greater than 0".to_string()));
        }
        if self.renderer.category_timeout_ms == 0 || self.renderer.product_timeout_ms == 0 {
            return Err(ConfigurationError::ValidationFailed("Navigation timeouts must be greater than 0".to_string()));
        }

        if self.max_products_per_category == Some(0) {
            return Err(ConfigurationError::ValidationFailed("max_products_per_category must be greater than 0".to_string()));
        }

        if self.embedding.dimension == 0 {
            return Err(ConfigurationError::ValidationFailed("embedding.dimension must be greater than 0".to_string()));
        }
        if self.embedding.max_image_bytes == 0 {
            return Err(ConfigurationError::ValidationFailed("embedding.max_image_bytes must be greater than 0".to_string()));
        }
        if let Some(endpoint) = &self.embedding.endpoint {
            if parse_http_url(endpoint).is_none() {
                return Err(ConfigurationError::ValidationFailed(format!("Invalid embedding endpoint: {}", endpoint)));
            }
        }

        match self.store.backend {
            StoreBackend::Supabase => {
                if self.store.endpoint.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(ConfigurationError::MissingRequiredField("store.endpoint (or SUPABASE_URL)".to_string()));
                }
                if self.store.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
                    return Err(ConfigurationError::MissingRequiredField("store.api_key (or SUPABASE_KEY)".to_string()));
                }
            }
            StoreBackend::Sqlite => {
                if self.store.sqlite_path.is_empty() {
                    return Err(ConfigurationError::MissingRequiredField("store.sqlite_path".to_string()));
                }
            }
            StoreBackend::DryRun => {}
        }
        if self.store.table.trim().is_empty() {
            return Err(ConfigurationError::MissingRequiredField("store.table".to_string()));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigurationError::InvalidLogLevel(self.logging.level.clone()));
        }
        if self.logging.enable_file_logging && self.logging.log_file.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "Log file path cannot be empty when file logging is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Initialize logging based on configuration. RUST_LOG still wins when set.
    pub fn init_logging(&self) -> CrawlerResult<()> {
        use log::LevelFilter;

        let log_level = match self.logging.level.as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        };

        let mut builder = env_logger::Builder::new();
        builder.filter_level(log_level);
        builder.parse_env(env_logger::Env::default());

        if self.logging.enable_file_logging {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.logging.log_file)?;
            builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
        }

        builder
            .try_init()
            .map_err(|e| ConfigurationError::ValidationFailed(format!("logger already initialized: {}", e)))?;
        Ok(())
    }

    pub fn base_url(&self) -> CrawlerResult<Url> {
        Ok(Url::parse(&self.site.base_url)?)
    }

    /// Host of the base URL without a leading "www."
    pub fn site_domain(&self) -> String {
        Url::parse(&self.site.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_default()
    }

    pub fn site_identity(&self) -> SiteIdentity {
        SiteIdentity {
            source: self.site.source.clone(),
            brand: self.site.brand.clone(),
        }
    }
}

impl RendererConfig {
    pub fn category_timeout(&self) -> Duration {
        Duration::from_millis(self.category_timeout_ms)
    }

    pub fn product_timeout(&self) -> Duration {
        Duration::from_millis(self.product_timeout_ms)
    }
}

fn parse_http_url(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Writes every log line to stderr and the log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}
