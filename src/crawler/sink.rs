//! Persistence boundary. Every sink upserts on `(source, product_url)`, so
//! re-running a crawl updates rows instead of duplicating them.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use rusqlite::{params, Connection, OptionalExtension};

use crate::crawler::config::{StoreBackend, StoreConfig};
use crate::crawler::errors::{ConfigurationError, CrawlerResult, SinkError};
use crate::crawler::product::ProductRecord;

const CONFLICT_COLUMNS: &str = "source,product_url";

#[async_trait]
pub trait ProductSink: Send + Sync {
    async fn upsert(&self, record: &ProductRecord) -> Result<(), SinkError>;

    /// Short label for logs
    fn name(&self) -> &'static str;
}

/// Build the sink selected by `store.backend`
pub fn from_config(config: &StoreConfig) -> CrawlerResult<Box<dyn ProductSink>> {
    check_table_name(&config.table)?;
    let sink: Box<dyn ProductSink> = match config.backend {
        StoreBackend::Sqlite => Box::new(SqliteSink::open(&config.sqlite_path, &config.table)?),
        StoreBackend::Supabase => Box::new(SupabaseSink::new(config)?),
        StoreBackend::DryRun => Box::new(DryRunSink),
    };
    info!("Persisting products with the {} sink", sink.name());
    Ok(sink)
}

fn check_table_name(table: &str) -> Result<(), ConfigurationError> {
    let valid = !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::ValidationFailed(format!("Invalid table name: {}", table)))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, SinkError> {
    serde_json::to_string(value).map_err(|e| SinkError::Encoding(e.to_string()))
}

/// Local SQLite table with a unique `(source, product_url)` constraint
pub struct SqliteSink {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteSink {
    pub fn open(path: &str, table: &str) -> CrawlerResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(SinkError::from)?;
        debug!("opened SQLite store at {}", path);
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory(table: &str) -> CrawlerResult<Self> {
        let conn = Connection::open_in_memory().map_err(SinkError::from)?;
        Self::with_connection(conn, table)
    }

    fn with_connection(conn: Connection, table: &str) -> CrawlerResult<Self> {
        check_table_name(table)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT NOT NULL,
                source TEXT NOT NULL,
                product_url TEXT NOT NULL,
                affiliate_url TEXT,
                image_url TEXT NOT NULL,
                brand TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT,
                gender TEXT NOT NULL,
                price REAL,
                currency TEXT NOT NULL,
                size TEXT,
                second_hand INTEGER NOT NULL DEFAULT 0,
                embedding TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(source, product_url)
            );"
        ))
        .map_err(SinkError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    pub fn count(&self) -> Result<usize, SinkError> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))
            .map_err(SinkError::from)?;
        Ok(n as usize)
    }

    /// Title and stored embedding JSON for a product URL
    pub fn lookup(&self, source: &str, product_url: &str) -> Result<Option<(String, Option<String>)>, SinkError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT title, embedding FROM {} WHERE source = ?1 AND product_url = ?2", self.table),
            params![source, product_url],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(SinkError::from)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::Connection("SQLite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProductSink for SqliteSink {
    async fn upsert(&self, record: &ProductRecord) -> Result<(), SinkError> {
        let embedding = record.embedding.as_ref().map(encode).transpose()?;
        let metadata = record.metadata.as_ref().map(encode).transpose()?;

        let sql = format!(
            "INSERT INTO {} (id, source, product_url, affiliate_url, image_url, brand, title, description,
                category, gender, price, currency, size, second_hand, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(source, product_url) DO UPDATE SET
                affiliate_url = excluded.affiliate_url,
                image_url = excluded.image_url,
                brand = excluded.brand,
                title = excluded.title,
                description = excluded.description,
                category = excluded.category,
                gender = excluded.gender,
                price = excluded.price,
                currency = excluded.currency,
                size = excluded.size,
                second_hand = excluded.second_hand,
                embedding = excluded.embedding,
                metadata = excluded.metadata",
            self.table
        );

        let conn = self.lock()?;
        conn.execute(
            &sql,
            params![
                record.id,
                record.source,
                record.product_url,
                record.affiliate_url,
                record.image_url,
                record.brand,
                record.title,
                record.description,
                record.category,
                record.gender.as_str(),
                record.price,
                record.currency,
                record.size,
                record.second_hand,
                embedding,
                metadata,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| SinkError::Write {
            url: record.product_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// Supabase table through its PostgREST endpoint
pub struct SupabaseSink {
    client: reqwest::Client,
    upsert_url: String,
}

impl SupabaseSink {
    pub fn new(config: &StoreConfig) -> CrawlerResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ConfigurationError::MissingRequiredField("store.endpoint".to_string()))?;
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigurationError::MissingRequiredField("store.api_key".to_string()))?;

        let header = |value: String| {
            HeaderValue::from_str(&value)
                .map_err(|e| ConfigurationError::ValidationFailed(format!("invalid Supabase key: {}", e)))
        };
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header(key.to_string())?);
        headers.insert(AUTHORIZATION, header(format!("Bearer {}", key))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("prefer", HeaderValue::from_static("resolution=merge-duplicates,return=minimal"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            upsert_url: Self::upsert_url(endpoint, &config.table),
        })
    }

    fn upsert_url(endpoint: &str, table: &str) -> String {
        format!(
            "{}/rest/v1/{}?on_conflict={}",
            endpoint.trim_end_matches('/'),
            table,
            CONFLICT_COLUMNS
        )
    }
}

#[async_trait]
impl ProductSink for SupabaseSink {
    async fn upsert(&self, record: &ProductRecord) -> Result<(), SinkError> {
        let write_err = |reason: String| SinkError::Write {
            url: record.product_url.clone(),
            reason,
        };

        let response = self
            .client
            .post(&self.upsert_url)
            .json(record)
            .send()
            .await
            .map_err(|e| write_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(write_err(format!("status {}: {}", status, body)));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

/// Logs records instead of storing them
pub struct DryRunSink;

#[async_trait]
impl ProductSink for DryRunSink {
    async fn upsert(&self, record: &ProductRecord) -> Result<(), SinkError> {
        info!(
            "[dry-run] {} | {:?} {} | embedding: {}",
            record.title,
            record.price,
            record.currency,
            record.embedding.as_ref().map(|e| e.len()).unwrap_or(0)
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
