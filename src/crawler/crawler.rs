use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, info, warn};

use super::config::CrawlerConfig;
use super::embedding::Embedder;
use super::errors::{CrawlerError, CrawlerResult, ErrorRecovery};
use super::extractor::ProductExtractor;
use super::listing::ListingWalker;
use super::logging::CrawlerLogger;
use super::renderer::{RenderedPage, Renderer, WaitPolicy};
use super::sink::ProductSink;
use super::state::{CrawlState, RunSummary};

/// Timing and limits for one run
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub category_timeout: Duration,
    /// Pause after the category page settles, before the walk starts
    pub category_settle: Duration,
    pub max_products_per_category: Option<usize>,
    pub product_delay: Duration,
    /// Longer pause after an unexpected failure
    pub error_delay: Duration,
    pub category_delay: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            category_timeout: config.renderer.category_timeout(),
            category_settle: Duration::from_millis(config.renderer.category_settle_ms),
            max_products_per_category: config.max_products_per_category,
            product_delay: Duration::from_millis(config.pacing.product_delay_ms),
            error_delay: Duration::from_millis(config.pacing.error_delay_ms),
            category_delay: Duration::from_millis(config.pacing.category_delay_ms),
        }
    }
}

enum ProductOutcome {
    Stored,
    Failed,
    Panicked,
}

/// Walks categories, extracts each product once and upserts it.
/// Product and category failures are recorded and the run continues.
pub struct Crawler<R: Renderer> {
    renderer: R,
    sink: Box<dyn ProductSink>,
    extractor: ProductExtractor,
    walker: ListingWalker,
    settings: CrawlSettings,
    state: CrawlState,
    logger: CrawlerLogger,
}

impl<R: Renderer> Crawler<R> {
    pub fn new(
        renderer: R,
        sink: Box<dyn ProductSink>,
        extractor: ProductExtractor,
        walker: ListingWalker,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            renderer,
            sink,
            extractor,
            walker,
            settings,
            state: CrawlState::new(),
            logger: CrawlerLogger::new(),
        }
    }

    /// Wire the extractor, walker and settings from configuration
    pub fn from_config(
        config: &CrawlerConfig,
        renderer: R,
        sink: Box<dyn ProductSink>,
        embedder: Option<Box<dyn Embedder>>,
    ) -> CrawlerResult<Self> {
        let extractor = ProductExtractor::new(config, embedder)?;
        let walker = ListingWalker::new(
            &config.site.product_path_marker,
            Duration::from_millis(config.renderer.scroll_settle_ms),
            config.renderer.max_scroll_attempts,
        );
        Ok(Self::new(renderer, sink, extractor, walker, CrawlSettings::from_config(config)))
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Crawl every category in order. Only fatal errors end the run early.
    pub async fn run(&mut self, category_urls: &[String]) -> CrawlerResult<RunSummary> {
        self.logger.start_operation("crawl");
        info!("Starting crawl of {} categories into {} sink", category_urls.len(), self.sink.name());

        let total = category_urls.len();
        let mut categories_failed = 0;
        for (index, url) in category_urls.iter().enumerate() {
            self.logger.log_category_start(index + 1, total, url);

            match self.crawl_category(url).await {
                Ok(()) => {}
                Err(e) if ErrorRecovery::is_fatal(&e) => {
                    self.logger.end_operation("crawl", false);
                    return Err(e);
                }
                Err(e) => {
                    categories_failed += 1;
                    self.logger.log_category_failure(url, &e);
                }
            }

            if index + 1 < total {
                pause(self.settings.category_delay).await;
            }
        }

        self.logger.end_operation("crawl", true);
        let summary = self.state.summary(total, categories_failed);
        self.logger.log_run_summary(&summary);
        Ok(summary)
    }

    /// One page per category, closed whatever happens inside
    async fn crawl_category(&mut self, url: &str) -> CrawlerResult<()> {
        let page = self.renderer.new_page().await.map_err(|e| wrap_category(url, e))?;
        let outcome = self.crawl_category_on(&page, url).await;
        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", url, e);
        }
        outcome
    }

    async fn crawl_category_on(&mut self, page: &R::Page, url: &str) -> CrawlerResult<()> {
        page.navigate(url, WaitPolicy::NetworkIdle, self.settings.category_timeout)
            .await
            .map_err(|e| wrap_category(url, e))?;
        page.sleep(self.settings.category_settle).await;

        let walk = self
            .walker
            .walk(page, url, self.settings.max_products_per_category)
            .await
            .map_err(|e| wrap_category(url, e))?;
        self.logger.log_category_walked(url, walk.product_urls.len(), walk.scroll_attempts);

        let total = walk.product_urls.len();
        for (i, product_url) in walk.product_urls.iter().enumerate() {
            if self.state.is_succeeded(product_url) {
                self.logger.log_product_skipped(product_url);
                continue;
            }
            self.logger.log_product_start(i + 1, total, product_url);

            let delay = match self.process_product(page, product_url).await {
                ProductOutcome::Stored | ProductOutcome::Failed => self.settings.product_delay,
                ProductOutcome::Panicked => self.settings.error_delay,
            };
            pause(delay).await;
        }
        Ok(())
    }

    /// Extract and persist one product; every outcome lands in the run state
    async fn process_product(&mut self, page: &R::Page, product_url: &str) -> ProductOutcome {
        let attempt = AssertUnwindSafe(self.extract_and_store(page, product_url))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok((title, has_embedding))) => {
                self.state.mark_succeeded(product_url);
                self.logger.log_product_success(product_url, &title, has_embedding);
                ProductOutcome::Stored
            }
            Ok(Err(e)) => {
                self.state.mark_failed(product_url);
                self.logger.log_product_failure(product_url, &e);
                ProductOutcome::Failed
            }
            Err(panic) => {
                self.state.mark_failed(product_url);
                self.logger.log_product_panic(product_url, &panic_message(panic.as_ref()));
                ProductOutcome::Panicked
            }
        }
    }

    async fn extract_and_store(&self, page: &R::Page, product_url: &str) -> CrawlerResult<(String, bool)> {
        let record = self.extractor.extract(page, product_url).await?;
        debug!("extracted '{}' from {}", record.title, product_url);
        self.sink.upsert(&record).await.map_err(CrawlerError::from)?;
        Ok((record.title, record.embedding.is_some()))
    }
}

fn wrap_category(url: &str, error: CrawlerError) -> CrawlerError {
    if ErrorRecovery::is_fatal(&error) {
        error
    } else {
        ErrorRecovery::category_load(url, error)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
