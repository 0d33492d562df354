use thiserror::Error;

/// Error types for the catalog crawler
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// Browser / page rendering errors
    #[error("Renderer error: {0}")]
    Render(#[from] RenderError),
    /// Product page extraction errors
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
    /// Image embedding errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Persistence errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    /// Validation related errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// A category page could not be loaded or walked
    #[error("Category load failed for {url}: {source}")]
    CategoryLoad {
        url: String,
        #[source]
        source: Box<CrawlerError>,
    },
}

/// Renderer specific errors
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),
    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },
    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },
    #[error("Script evaluation failed: {0}")]
    ScriptFailed(String),
    #[error("Unexpected script result: {0}")]
    UnexpectedValue(String),
    #[error("Page could not be opened: {0}")]
    PageUnavailable(String),
}

/// Extraction specific errors. All of these discard the record.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No title found for {0}")]
    MissingTitle(String),
    #[error("No image found for {0}")]
    MissingImage(String),
    #[error("Invalid image URL '{image}' for {url}")]
    InvalidImageUrl { url: String, image: String },
    #[error("Invalid selector '{0}'")]
    InvalidSelector(String),
}

/// Embedding specific errors. Callers fold all of them into "no embedding".
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Image fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Embedding service failed: {0}")]
    Service(String),
    #[error("Malformed embedding response: {0}")]
    Decode(String),
    #[error("Embedding dimension mismatch: {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding vector has zero norm")]
    ZeroVector,
}

/// Persistence specific errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to connect to store: {0}")]
    Connection(String),
    #[error("Upsert failed for {url}: {reason}")]
    Write { url: String, reason: String },
    #[error("Failed to encode record: {0}")]
    Encoding(String),
}

/// Configuration specific errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Configuration read failed: {0}")]
    ReadFailed(String),
    #[error("Configuration parse error: {0}")]
    ParseError(String),
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("Missing required configuration field: {0}")]
    MissingRequiredField(String),
}

/// Validation specific errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<url::ParseError> for CrawlerError {
    fn from(err: url::ParseError) -> Self {
        CrawlerError::Validation(ValidationError::InvalidUrl(err.to_string()))
    }
}

impl From<serde_yaml::Error> for CrawlerError {
    fn from(err: serde_yaml::Error) -> Self {
        CrawlerError::Configuration(ConfigurationError::ParseError(err.to_string()))
    }
}

impl From<std::io::Error> for CrawlerError {
    fn from(err: std::io::Error) -> Self {
        CrawlerError::Configuration(ConfigurationError::ReadFailed(err.to_string()))
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Connection(err.to_string())
    }
}

/// Result type alias for crawler operations
pub type CrawlerResult<T> = Result<T, CrawlerError>;

/// How a failure is treated by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Required field missing or invalid; URL marked failed, no retry
    HardExtraction,
    /// Renderer, embedding or sink I/O failed; URL marked failed, run continues
    Transport,
    /// Category page failed; only that category is abandoned
    CategoryLoad,
    /// Resource initialization or configuration; the run stops
    Fatal,
}

/// Failure classification
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Classify an error into the orchestrator's failure taxonomy
    pub fn classify(error: &CrawlerError) -> FailureKind {
        match error {
            CrawlerError::Extraction(_) | CrawlerError::Validation(_) => FailureKind::HardExtraction,
            CrawlerError::CategoryLoad { .. } => FailureKind::CategoryLoad,
            CrawlerError::Render(RenderError::LaunchFailed(_)) => FailureKind::Fatal,
            CrawlerError::Sink(SinkError::Connection(_)) => FailureKind::Fatal,
            CrawlerError::Configuration(_) => FailureKind::Fatal,
            CrawlerError::Render(_) | CrawlerError::Embedding(_) | CrawlerError::Sink(_) => {
                FailureKind::Transport
            }
        }
    }

    /// Only initialization and configuration errors may end a run
    pub fn is_fatal(error: &CrawlerError) -> bool {
        Self::classify(error) == FailureKind::Fatal
    }

    /// Wrap an error raised while loading or walking a category page
    pub fn category_load(url: &str, error: CrawlerError) -> CrawlerError {
        CrawlerError::CategoryLoad {
            url: url.to_string(),
            source: Box::new(error),
        }
    }
}
