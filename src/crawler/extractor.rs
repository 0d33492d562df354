use std::time::Duration;

use log::{debug, warn};
use scraper::Html;
use url::Url;

use crate::crawler::config::CrawlerConfig;
use crate::crawler::embedding::{embed_or_absent, Embedder};
use crate::crawler::errors::CrawlerResult;
use crate::crawler::product::{validate_required, ProductFields, ProductRecord, SiteIdentity};
use crate::crawler::renderer::{evaluate_as, scripts, RenderedPage, WaitPolicy};
use crate::crawler::selectors::{detect_currency, PriceOutcome, ProductSelectors};

/// Turns one product page into a `ProductRecord`
pub struct ProductExtractor {
    selectors: ProductSelectors,
    site: SiteIdentity,
    base_url: Url,
    embedder: Option<Box<dyn Embedder>>,
    timeout: Duration,
    settle: Duration,
}

impl ProductExtractor {
    pub fn new(config: &CrawlerConfig, embedder: Option<Box<dyn Embedder>>) -> CrawlerResult<Self> {
        Ok(Self {
            selectors: ProductSelectors::compile(&config.selectors, &config.site_domain())?,
            site: config.site_identity(),
            base_url: config.base_url()?,
            embedder,
            timeout: config.renderer.product_timeout(),
            settle: Duration::from_millis(config.renderer.product_settle_ms),
        })
    }

    /// Load the page, resolve every field, validate, then try for an embedding.
    /// Missing title or image and renderer failures are errors; everything else degrades.
    pub async fn extract<P>(&self, page: &P, product_url: &str) -> CrawlerResult<ProductRecord>
    where
        P: RenderedPage + ?Sized,
    {
        page.navigate(product_url, WaitPolicy::DomReady, self.timeout).await?;
        page.sleep(self.settle).await;

        let html: String = evaluate_as(page, scripts::OUTER_HTML).await?;
        let mut fields = self.resolve_fields(&html, product_url);
        fields.resolved_url = evaluate_as::<Option<String>, _>(page, scripts::LOCATION_HREF)
            .await
            .ok()
            .flatten();

        let required = validate_required(&fields, product_url, &self.base_url)?;

        let embedding = match &self.embedder {
            Some(embedder) => embed_or_absent(embedder.as_ref(), &required.image_url).await,
            None => None,
        };

        Ok(ProductRecord::assemble(&self.site, product_url, required, fields, embedding))
    }

    /// Apply every field chain to a rendered document
    pub fn resolve_fields(&self, html: &str, product_url: &str) -> ProductFields {
        let doc = Html::parse_document(html);
        let s = &self.selectors;

        let price = match s.price(&doc) {
            PriceOutcome::Parsed(p) => Some(p),
            PriceOutcome::Unparseable(text) => {
                warn!("Could not read a price from '{}' on {}", text.trim(), product_url);
                None
            }
            PriceOutcome::NoElement => {
                debug!("no price element on {}", product_url);
                None
            }
        };

        let breadcrumbs = s.breadcrumbs(&doc);
        let category = breadcrumbs.last().cloned();

        ProductFields {
            title: s.title.resolve(&doc),
            price,
            currency: Some(detect_currency(&doc)),
            image_url: s.image.resolve(&doc),
            description: s.description.resolve(&doc),
            sizes: s.sizes.resolve(&doc).unwrap_or_default(),
            category,
            breadcrumbs,
            resolved_url: None,
        }
    }
}
