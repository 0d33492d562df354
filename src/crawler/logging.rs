use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::crawler::errors::{CrawlerError, ErrorRecovery, FailureKind};
use crate::crawler::state::RunSummary;

/// Structured logging for a crawl run
pub struct CrawlerLogger {
    start_time: Instant,
    operation_timers: HashMap<String, Instant>,
    stats: LoggingStats,
}

/// Counters kept alongside the log
#[derive(Debug, Default)]
pub struct LoggingStats {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub products_skipped: usize,
    pub warnings_count: usize,
    pub errors_count: usize,
}

/// Context information for structured logging
#[derive(Debug, Clone)]
pub struct LogContext {
    pub operation: String,
    pub url: Option<String>,
    pub additional_data: HashMap<String, String>,
}

impl LogContext {
    fn new(operation: &str, url: &str) -> Self {
        Self {
            operation: operation.to_string(),
            url: Some(url.to_string()),
            additional_data: HashMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.additional_data.insert(key.to_string(), value.to_string());
        self
    }
}

impl CrawlerLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            operation_timers: HashMap::new(),
            stats: LoggingStats::default(),
        }
    }

    /// Start timing an operation
    pub fn start_operation(&mut self, operation_name: &str) {
        self.operation_timers.insert(operation_name.to_string(), Instant::now());
        info!("🚀 Starting operation: {}", operation_name);
    }

    /// End timing an operation and log the duration
    pub fn end_operation(&mut self, operation_name: &str, success: bool) {
        if let Some(start_time) = self.operation_timers.remove(operation_name) {
            let duration = start_time.elapsed();
            let status = if success { "✅ SUCCESS" } else { "❌ FAILED" };

            info!("{} Operation '{}' completed in {:?}", status, operation_name, duration);

            self.stats.total_operations += 1;
            if success {
                self.stats.successful_operations += 1;
            } else {
                self.stats.failed_operations += 1;
            }
        }
    }

    pub fn log_category_start(&self, index: usize, total: usize, url: &str) {
        info!("{}", "=".repeat(60));
        info!("📂 Category {}/{}: {}", index, total, url);
        info!("{}", "=".repeat(60));
    }

    pub fn log_category_walked(&self, url: &str, found: usize, scrolls: usize) {
        let context = LogContext::new("category_walk", url)
            .with("products_found", found)
            .with("scroll_attempts", scrolls);
        self.log_structured("Category walk finished", &context);
        info!("🔎 Found {} products in {}", found, url);
    }

    /// Category-level failure; the run moves on to the next category
    pub fn log_category_failure(&mut self, url: &str, error: &CrawlerError) {
        error!("❌ Error processing category {}: {}", url, error);
        self.stats.errors_count += 1;
    }

    pub fn log_product_start(&self, current: usize, total: usize, url: &str) {
        info!("[{}/{}] Processing: {}", current, total, url);
    }

    pub fn log_product_success(&mut self, url: &str, title: &str, has_embedding: bool) {
        let context = LogContext::new("product", url)
            .with("title", title)
            .with("embedding", has_embedding);
        info!("✅ Successfully processed: {}", title);
        if !has_embedding {
            warn!("⚠️  Stored without embedding: {}", url);
            self.stats.warnings_count += 1;
        }
        self.log_structured("Product stored", &context);
    }

    pub fn log_product_skipped(&mut self, url: &str) {
        debug!("⏭️  Already processed: {}", url);
        self.stats.products_skipped += 1;
    }

    /// Product-level failure, tagged with how the error classifies
    pub fn log_product_failure(&mut self, url: &str, error: &CrawlerError) {
        let kind = ErrorRecovery::classify(error);
        let context = LogContext::new("product", url).with("failure_kind", format!("{:?}", kind));
        match kind {
            FailureKind::HardExtraction => warn!("⚠️  Skipping {}: {}", url, error),
            _ => error!("❌ Failed to process {}: {}", url, error),
        }
        self.stats.errors_count += 1;
        self.log_structured("Product failed", &context);
    }

    /// A panic escaped product processing
    pub fn log_product_panic(&mut self, url: &str, message: &str) {
        error!("💥 Unexpected error processing {}: {}", url, message);
        self.stats.errors_count += 1;
    }

    pub fn get_total_elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Totals plus the first failed URLs
    pub fn log_run_summary(&self, summary: &RunSummary) {
        for line in self.summary_lines(summary) {
            info!("{}", line);
        }
    }

    fn summary_lines(&self, summary: &RunSummary) -> Vec<String> {
        let rule = "=".repeat(60);
        let mut lines = vec![
            rule.clone(),
            format!("🏁 Crawl completed in {:?}", self.get_total_elapsed()),
            format!("   Categories: {} ({} failed)", summary.categories_attempted, summary.categories_failed),
            format!("   Successfully processed: {} products", summary.succeeded),
            format!("   Failed: {} products", summary.failed),
        ];
        if self.stats.products_skipped > 0 {
            lines.push(format!("   Skipped (seen earlier in run): {}", self.stats.products_skipped));
        }
        lines.push(format!("   Warnings: {}", self.stats.warnings_count));
        lines.push(format!("   Errors: {}", self.stats.errors_count));
        lines.push(format!(
            "   Timed operations: {} ({} succeeded, {} failed)",
            self.stats.total_operations, self.stats.successful_operations, self.stats.failed_operations
        ));

        if !summary.failed_sample.is_empty() {
            lines.push("   Failed URLs:".to_string());
            lines.extend(summary.failed_sample.iter().map(|url| format!("     - {}", url)));
            if summary.failed > summary.failed_sample.len() {
                lines.push(format!("     ... and {} more", summary.failed - summary.failed_sample.len()));
            }
        }

        let attempted = summary.succeeded + summary.failed;
        let success_rate = if attempted > 0 {
            (summary.succeeded as f64 / attempted as f64) * 100.0
        } else {
            0.0
        };
        lines.push(format!("   Success rate: {:.1}%", success_rate));
        lines.push(rule);
        lines
    }

    /// One debug line carrying the context map
    fn log_structured(&self, message: &str, context: &LogContext) {
        debug!(
            "[{}] {} | URL: {} | Data: {:?}",
            context.operation,
            message,
            context.url.as_deref().unwrap_or("N/A"),
            context.additional_data
        );
    }
}

impl Default for CrawlerLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::errors::{ExtractionError, SinkError};

    #[test]
    fn test_crawler_logger_creation() {
        let logger = CrawlerLogger::new();
        assert_eq!(logger.stats.total_operations, 0);
        assert_eq!(logger.stats.errors_count, 0);
    }

    #[test]
    fn test_operation_timing() {
        let mut logger = CrawlerLogger::new();

        logger.start_operation("category");
        std::thread::sleep(Duration::from_millis(5));
        logger.end_operation("category", true);
        logger.end_operation("never_started", false);

        assert_eq!(logger.stats.total_operations, 1);
        assert_eq!(logger.stats.successful_operations, 1);
        assert_eq!(logger.stats.failed_operations, 0);
    }

    #[test]
    fn test_product_outcome_counters() {
        let mut logger = CrawlerLogger::new();
        logger.log_product_success("https://a/p/1", "Tee", false);
        logger.log_product_skipped("https://a/p/1");
        logger.log_product_failure(
            "https://a/p/2",
            &ExtractionError::MissingTitle("https://a/p/2".into()).into(),
        );
        logger.log_product_failure(
            "https://a/p/3",
            &SinkError::Write {
                url: "https://a/p/3".into(),
                reason: "timeout".into(),
            }
            .into(),
        );

        let stats = &logger.stats;
        assert_eq!(stats.warnings_count, 1);
        assert_eq!(stats.products_skipped, 1);
        assert_eq!(stats.errors_count, 2);
    }

    #[test]
    fn test_summary_reports_counters() {
        let mut logger = CrawlerLogger::new();
        logger.start_operation("crawl");
        logger.end_operation("crawl", true);
        logger.log_product_success("https://a/p/1", "Tee", false);
        logger.log_product_panic("https://a/p/2", "boom");
        logger.log_product_skipped("https://a/p/1");

        let summary = RunSummary {
            categories_attempted: 1,
            categories_failed: 0,
            succeeded: 1,
            failed: 12,
            failed_sample: (0..10).map(|i| format!("https://a/p/f{}", i)).collect(),
        };
        let lines = logger.summary_lines(&summary);

        assert!(lines.contains(&"   Warnings: 1".to_string()));
        assert!(lines.contains(&"   Errors: 1".to_string()));
        assert!(lines.contains(&"   Skipped (seen earlier in run): 1".to_string()));
        assert!(lines.contains(&"   Timed operations: 1 (1 succeeded, 0 failed)".to_string()));
        assert!(lines.contains(&"     ... and 2 more".to_string()));
        assert_eq!(lines.iter().filter(|l| l.starts_with("     - ")).count(), 10);
    }
}
