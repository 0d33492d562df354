use anyhow::Context;
use clap::Parser;

use catalog_crawler::crawler::chrome_renderer::ChromeRenderer;
use catalog_crawler::crawler::config::{CrawlerConfig, StoreBackend};
use catalog_crawler::crawler::embedding::{Embedder, HttpEmbedder};
use catalog_crawler::crawler::renderer::Renderer;
use catalog_crawler::crawler::sink;
use catalog_crawler::Crawler;

/// Product cap used by `--test`
const TEST_RUN_CAP: usize = 5;

#[derive(Parser)]
#[command(name = "catalog_crawler", about = "Crawl retail category pages into a product catalog")]
struct Cli {
    /// YAML config file (default: config/crawler.yaml or crawler.yaml if present)
    #[arg(short, long)]
    config: Option<String>,
    /// Small run: at most 5 products per category
    #[arg(long)]
    test: bool,
    /// Max products per category
    #[arg(short = 'n', long)]
    max_products: Option<usize>,
    /// Category URL to crawl instead of the configured list (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Log records instead of writing them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CrawlerConfig::load_from_yaml(path).with_context(|| format!("Failed to load {}", path))?,
        None => CrawlerConfig::discover().context("Failed to load configuration")?,
    };
    config.apply_env_overrides();
    if !cli.categories.is_empty() {
        config.site.category_urls = cli.categories.clone();
    }
    if let Some(n) = cli.max_products {
        config.max_products_per_category = Some(n);
    } else if cli.test {
        config.max_products_per_category = Some(TEST_RUN_CAP);
    }
    if cli.dry_run {
        config.store.backend = StoreBackend::DryRun;
    }

    config.validate().context("Invalid configuration")?;
    config.init_logging()?;

    if cli.test {
        log::info!("Running in TEST mode: max {} products per category", TEST_RUN_CAP);
    }

    let sink = sink::from_config(&config.store).context("Failed to open product store")?;
    let embedder: Option<Box<dyn Embedder>> = match &config.embedding.endpoint {
        Some(_) => Some(Box::new(HttpEmbedder::new(&config.embedding)?)),
        None => {
            log::warn!("No embedding endpoint configured; records will be stored without embeddings");
            None
        }
    };

    let renderer = ChromeRenderer::launch(&config.renderer)
        .await
        .context("Failed to launch browser")?;
    let mut crawler = Crawler::from_config(&config, renderer, sink, embedder)?;

    let categories = config.site.category_urls.clone();
    let result = crawler.run(&categories).await;

    if let Err(e) = crawler.renderer().shutdown().await {
        log::warn!("Browser shutdown failed: {}", e);
    }

    let summary = result?;
    if summary.succeeded == 0 && summary.failed > 0 {
        log::warn!("No products were stored in this run");
    }
    Ok(())
}
