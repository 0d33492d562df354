use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use catalog_crawler::crawler::config::{CrawlerConfig, PacingConfig};
use catalog_crawler::crawler::embedding::Embedder;
use catalog_crawler::crawler::errors::{CrawlerError, CrawlerResult, EmbeddingError, RenderError, SinkError};
use catalog_crawler::crawler::listing::{ListingWalker, StopReason};
use catalog_crawler::crawler::product::{Gender, ProductRecord};
use catalog_crawler::crawler::renderer::{scripts, RenderedPage, Renderer, WaitPolicy};
use catalog_crawler::crawler::sink::{ProductSink, SqliteSink};
use catalog_crawler::Crawler;

const SITE: &str = "https://shop.test";

/// A category page reveals one more batch of anchors per scroll
#[derive(Clone)]
enum Listing {
    Batches(Vec<Vec<String>>),
    /// Grows forever with a new product per scroll
    Endless,
}

#[derive(Default)]
struct FakeSite {
    listings: HashMap<String, Listing>,
    products: HashMap<String, String>,
    broken: HashSet<String>,
    panicking: HashSet<String>,
}

impl FakeSite {
    fn listing(mut self, url: &str, batches: Vec<Vec<&str>>) -> Self {
        let batches = batches
            .into_iter()
            .map(|b| b.into_iter().map(String::from).collect())
            .collect();
        self.listings.insert(url.to_string(), Listing::Batches(batches));
        self
    }

    fn endless(mut self, url: &str) -> Self {
        self.listings.insert(url.to_string(), Listing::Endless);
        self
    }

    fn product(mut self, url: &str, html: String) -> Self {
        self.products.insert(url.to_string(), html);
        self
    }

    fn broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }
}

#[derive(Clone, Default)]
struct Counters {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    navigations: Arc<Mutex<Vec<String>>>,
}

struct FakeRenderer {
    site: Arc<FakeSite>,
    counters: Counters,
    launch_broken: bool,
}

impl FakeRenderer {
    fn new(site: FakeSite) -> Self {
        Self {
            site: Arc::new(site),
            counters: Counters::default(),
            launch_broken: false,
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    type Page = FakePage;

    async fn new_page(&self) -> CrawlerResult<FakePage> {
        if self.launch_broken {
            return Err(RenderError::LaunchFailed("browser binary missing".to_string()).into());
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakePage {
            site: Arc::clone(&self.site),
            counters: self.counters.clone(),
            current: Mutex::new(String::new()),
            scrolls: AtomicUsize::new(0),
        })
    }
}

struct FakePage {
    site: Arc<FakeSite>,
    counters: Counters,
    current: Mutex<String>,
    scrolls: AtomicUsize,
}

impl FakePage {
    fn current(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    fn visible_anchors(&self, listing: &Listing, scrolls: usize) -> Vec<String> {
        match listing {
            Listing::Batches(batches) => batches.iter().take(scrolls).flatten().cloned().collect(),
            Listing::Endless => (0..scrolls).map(|i| format!("{}/p/men/endless-{}", SITE, i)).collect(),
        }
    }

    fn height(&self, listing: &Listing, scrolls: usize) -> usize {
        match listing {
            Listing::Batches(batches) => 1000 * scrolls.min(batches.len()),
            Listing::Endless => 1000 * scrolls,
        }
    }
}

#[async_trait]
impl RenderedPage for FakePage {
    async fn navigate(&self, url: &str, _wait: WaitPolicy, timeout: Duration) -> CrawlerResult<()> {
        self.counters.navigations.lock().unwrap().push(url.to_string());
        if self.site.broken.contains(url) {
            return Err(RenderError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        *self.current.lock().unwrap() = url.to_string();
        self.scrolls.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> CrawlerResult<Value> {
        let current = self.current();
        if script == scripts::SCROLL_TO_BOTTOM {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            return Ok(Value::Null);
        }
        if script == scripts::LOCATION_HREF {
            return Ok(json!(current));
        }
        if script == scripts::OUTER_HTML {
            if self.site.panicking.contains(&current) {
                panic!("renderer crashed on {}", current);
            }
            return self
                .site
                .products
                .get(&current)
                .map(|html| json!(html))
                .ok_or_else(|| RenderError::ScriptFailed(format!("no page at {}", current)).into());
        }

        let listing = self
            .site
            .listings
            .get(&current)
            .ok_or_else(|| CrawlerError::from(RenderError::ScriptFailed(format!("not a listing: {}", current))))?;
        let scrolls = self.scrolls.load(Ordering::SeqCst);
        if script == scripts::DOCUMENT_HEIGHT {
            Ok(json!(self.height(listing, scrolls)))
        } else if script.contains("querySelectorAll") {
            Ok(json!(self.visible_anchors(listing, scrolls)))
        } else {
            Err(RenderError::ScriptFailed(format!("unexpected script: {}", script)).into())
        }
    }

    async fn close(self) -> CrawlerResult<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FixedEmbedder {
    produced: usize,
    expected: usize,
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn dimension(&self) -> usize {
        self.expected
    }

    async fn embed(&self, _image_url: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0; self.produced])
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    records: Arc<Mutex<Vec<ProductRecord>>>,
    rejects: Arc<HashSet<String>>,
}

impl RecordingSink {
    fn rejecting(urls: &[&str]) -> Self {
        Self {
            records: Arc::default(),
            rejects: Arc::new(urls.iter().map(|u| u.to_string()).collect()),
        }
    }

    fn urls(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|r| r.product_url.clone()).collect()
    }
}

#[async_trait]
impl ProductSink for RecordingSink {
    async fn upsert(&self, record: &ProductRecord) -> Result<(), SinkError> {
        if self.rejects.contains(&record.product_url) {
            return Err(SinkError::Write {
                url: record.product_url.clone(),
                reason: "connection reset".to_string(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn test_config() -> CrawlerConfig {
    let mut config = CrawlerConfig::default();
    config.site.base_url = SITE.to_string();
    config.renderer.category_settle_ms = 0;
    config.renderer.product_settle_ms = 0;
    config.renderer.scroll_settle_ms = 0;
    config.renderer.max_scroll_attempts = 20;
    config.pacing = PacingConfig {
        product_delay_ms: 0,
        error_delay_ms: 0,
        category_delay_ms: 0,
    };
    config
}

fn product_html(title: Option<&str>, image: Option<&str>, price: &str) -> String {
    let title = title.map(|t| format!(r#"<h1 data-testid="product-title">{}</h1>"#, t)).unwrap_or_default();
    let image = image.map(|i| format!(r#"<img data-testid="product-image" src="{}">"#, i)).unwrap_or_default();
    format!(
        r#"<html><body>
            <nav aria-label="breadcrumb"><a>Men</a><a>Tees</a></nav>
            {title}
            <div data-testid="product-price">{price}</div>
            {image}
            <button class="size-chip">M</button>
        </body></html>"#
    )
}

fn url(path: &str) -> String {
    format!("{}{}", SITE, path)
}

fn crawler(
    config: &CrawlerConfig,
    renderer: FakeRenderer,
    sink: RecordingSink,
    embedder: Option<Box<dyn Embedder>>,
) -> Crawler<FakeRenderer> {
    Crawler::from_config(config, renderer, Box::new(sink), embedder).unwrap()
}

#[tokio::test]
async fn test_one_category_with_a_broken_product() {
    let category = url("/c/men");
    let (good1, good2, untitled) = (url("/p/men/tee-1"), url("/p/men/tee-2"), url("/p/men/tee-3"));
    let site = FakeSite::default()
        .listing(&category, vec![vec!["/p/men/tee-1", "/p/men/tee-2", "/p/men/tee-3", "/c/women"]])
        .product(&good1, product_html(Some("Tee One"), Some("/img/1.jpg"), "$49.99"))
        .product(&good2, product_html(Some("Tee Two"), Some("https://cdn.test/2.jpg"), "Sold out"))
        .product(&untitled, product_html(None, Some("/img/3.jpg"), "$10"));

    let renderer = FakeRenderer::new(site);
    let counters = renderer.counters.clone();
    let sink = RecordingSink::default();
    let mut crawler = crawler(&test_config(), renderer, sink.clone(), None);

    let summary = crawler.run(&[category.clone()]).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_sample, vec![untitled.clone()]);
    assert_eq!(summary.categories_failed, 0);
    assert!(crawler.state().is_failed(&untitled));
    assert!(!crawler.state().is_succeeded(&untitled));

    let records = sink.records.lock().unwrap().clone();
    assert_eq!(records.len(), 2);
    let first = &records[0];
    assert_eq!(first.title, "Tee One");
    assert_eq!(first.price, Some(49.99));
    assert_eq!(first.currency, "USD");
    assert_eq!(first.image_url, "https://shop.test/img/1.jpg");
    assert_eq!(first.gender, Gender::Man);
    assert_eq!(first.category.as_deref(), Some("Tees"));
    assert_eq!(first.size.as_deref(), Some("M"));
    assert!(first.embedding.is_none());
    assert_eq!(records[1].price, None);

    assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_product_seen_in_two_categories_is_extracted_once() {
    let (men, sale) = (url("/c/men"), url("/c/sale"));
    let shared = url("/p/men/shared");
    let only_sale = url("/p/men/sale-only");
    let site = FakeSite::default()
        .listing(&men, vec![vec!["/p/men/shared"]])
        .listing(&sale, vec![vec!["/p/men/shared", "/p/men/sale-only"]])
        .product(&shared, product_html(Some("Shared"), Some("/img/s.jpg"), "$5"))
        .product(&only_sale, product_html(Some("Sale"), Some("/img/o.jpg"), "$3"));

    let renderer = FakeRenderer::new(site);
    let counters = renderer.counters.clone();
    let sink = RecordingSink::default();
    let mut crawler = crawler(&test_config(), renderer, sink.clone(), None);

    let summary = crawler.run(&[men, sale]).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(sink.urls(), vec![shared.clone(), only_sale]);
    let shared_visits = counters
        .navigations
        .lock()
        .unwrap()
        .iter()
        .filter(|u| **u == shared)
        .count();
    assert_eq!(shared_visits, 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_category_does_not_stop_the_run() {
    let (broken, working) = (url("/c/broken"), url("/c/working"));
    let product = url("/p/women/dress");
    let site = FakeSite::default()
        .broken(&broken)
        .listing(&working, vec![vec!["/p/women/dress"]])
        .product(&product, product_html(Some("Dress"), Some("/img/d.jpg"), "$60"));

    let renderer = FakeRenderer::new(site);
    let counters = renderer.counters.clone();
    let sink = RecordingSink::default();
    let mut crawler = crawler(&test_config(), renderer, sink.clone(), None);

    let summary = crawler.run(&[broken, working]).await.unwrap();

    assert_eq!(summary.categories_attempted, 2);
    assert_eq!(summary.categories_failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(sink.records.lock().unwrap()[0].gender, Gender::Woman);
    assert_eq!(counters.opened.load(Ordering::SeqCst), counters.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_launch_failure_is_fatal() {
    let mut renderer = FakeRenderer::new(FakeSite::default());
    renderer.launch_broken = true;
    let mut crawler = crawler(&test_config(), renderer, RecordingSink::default(), None);

    let result = crawler.run(&[url("/c/men")]).await;
    assert!(matches!(result, Err(CrawlerError::Render(RenderError::LaunchFailed(_)))));
}

#[tokio::test]
async fn test_product_cap_limits_extraction() {
    let category = url("/c/men");
    let batch1 = vec!["/p/men/a", "/p/men/b", "/p/men/c", "/p/men/d"];
    let batch2 = vec!["/p/men/e", "/p/men/f", "/p/men/g", "/p/men/h"];
    let mut site = FakeSite::default().listing(&category, vec![batch1.clone(), batch2.clone()]);
    for path in batch1.iter().chain(batch2.iter()) {
        site = site.product(&url(path), product_html(Some(*path), Some("/img/x.jpg"), "$1"));
    }

    let mut config = test_config();
    config.max_products_per_category = Some(5);
    let sink = RecordingSink::default();
    let mut crawler = crawler(&config, FakeRenderer::new(site), sink.clone(), None);

    let summary = crawler.run(&[category]).await.unwrap();
    assert_eq!(summary.succeeded, 5);
    assert_eq!(sink.urls().last().cloned(), Some(url("/p/men/e")));
}

#[tokio::test]
async fn test_walker_dedups_across_scrolls_and_stops_at_end() {
    let category = url("/c/men");
    let site = FakeSite::default().listing(
        &category,
        vec![vec!["/p/men/a", "/p/men/b"], vec!["/p/men/b", "/p/men/a", "/p/men/c"]],
    );
    let renderer = FakeRenderer::new(site);
    let page = renderer.new_page().await.unwrap();
    page.navigate(&category, WaitPolicy::NetworkIdle, Duration::from_secs(1))
        .await
        .unwrap();

    let walker = ListingWalker::new("/p/", Duration::ZERO, 20);
    let walk = walker.walk(&page, &category, None).await.unwrap();

    assert_eq!(walk.product_urls, vec![url("/p/men/a"), url("/p/men/b"), url("/p/men/c")]);
    assert_eq!(walk.stop_reason, StopReason::EndOfContent);
    assert!(walk.scroll_attempts < 20);
}

#[tokio::test]
async fn test_walker_respects_attempt_cap_on_endless_listing() {
    let category = url("/c/endless");
    let renderer = FakeRenderer::new(FakeSite::default().endless(&category));
    let page = renderer.new_page().await.unwrap();
    page.navigate(&category, WaitPolicy::NetworkIdle, Duration::from_secs(1))
        .await
        .unwrap();

    let walker = ListingWalker::new("/p/", Duration::ZERO, 7);
    let walk = walker.walk(&page, &category, None).await.unwrap();

    assert_eq!(walk.stop_reason, StopReason::AttemptCap);
    assert_eq!(walk.scroll_attempts, 7);
    assert_eq!(walk.product_urls.len(), 7);
}

#[tokio::test]
async fn test_embedding_dimension_is_enforced() {
    let category = url("/c/men");
    let product = url("/p/men/tee");
    let site = || {
        FakeSite::default()
            .listing(&category, vec![vec!["/p/men/tee"]])
            .product(&product, product_html(Some("Tee"), Some("/img/t.jpg"), "$9"))
    };

    let sink = RecordingSink::default();
    let wrong: Box<dyn Embedder> = Box::new(FixedEmbedder { produced: 512, expected: 768 });
    let mut crawler_wrong = crawler(&test_config(), FakeRenderer::new(site()), sink.clone(), Some(wrong));
    let summary = crawler_wrong.run(&[category.clone()]).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(sink.records.lock().unwrap()[0].embedding.is_none());

    let sink = RecordingSink::default();
    let right: Box<dyn Embedder> = Box::new(FixedEmbedder { produced: 768, expected: 768 });
    let mut crawler_right = crawler(&test_config(), FakeRenderer::new(site()), sink.clone(), Some(right));
    crawler_right.run(&[category.clone()]).await.unwrap();
    let embedding = sink.records.lock().unwrap()[0].embedding.clone().unwrap();
    assert_eq!(embedding.len(), 768);
}

#[tokio::test]
async fn test_sink_failure_and_panic_are_isolated() {
    let category = url("/c/men");
    let (rejected, crashing, fine) = (url("/p/men/rejected"), url("/p/men/crash"), url("/p/men/fine"));
    let site = FakeSite::default()
        .listing(&category, vec![vec!["/p/men/rejected", "/p/men/crash", "/p/men/fine"]])
        .product(&rejected, product_html(Some("Rejected"), Some("/img/r.jpg"), "$1"))
        .product(&crashing, product_html(Some("Crash"), Some("/img/c.jpg"), "$1"))
        .product(&fine, product_html(Some("Fine"), Some("/img/f.jpg"), "$1"))
        .panicking(&crashing);

    let sink = RecordingSink::rejecting(&[rejected.as_str()]);
    let mut crawler = crawler(&test_config(), FakeRenderer::new(site), sink.clone(), None);

    let summary = crawler.run(&[category]).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.failed_sample, vec![rejected, crashing]);
    assert_eq!(sink.urls(), vec![fine]);
}

#[tokio::test]
async fn test_rerun_into_sqlite_updates_rows() {
    let category = url("/c/men");
    let product = url("/p/men/tee");
    let store_dir = tempfile::TempDir::new().unwrap();
    let db_path = store_dir.path().join("products.sqlite");
    let db_path = db_path.to_str().unwrap();

    for title in ["First Title", "Second Title"] {
        let site = FakeSite::default()
            .listing(&category, vec![vec!["/p/men/tee"]])
            .product(&product, product_html(Some(title), Some("/img/t.jpg"), "$9"));
        let sink = SqliteSink::open(db_path, "products").unwrap();
        let mut crawler = Crawler::from_config(&test_config(), FakeRenderer::new(site), Box::new(sink), None).unwrap();
        crawler.run(&[category.clone()]).await.unwrap();
    }

    let store = SqliteSink::open(db_path, "products").unwrap();
    assert_eq!(store.count().unwrap(), 1);
    let (title, _) = store.lookup("scraper", &product).unwrap().unwrap();
    assert_eq!(title, "Second Title");
}
