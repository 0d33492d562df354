//! Field resolution over rendered product markup. Each field is an ordered chain
//! of strategies `&Html -> Option<T>`; the first strategy that yields a value wins.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::crawler::errors::{CrawlerResult, ExtractionError};

/// Size labels at or above this many characters are decoration, not sizes
const MAX_SIZE_LABEL_CHARS: usize = 10;

static PRICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9,]+\.?[0-9]*").expect("valid price regex"));
static PRICE_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d*)?").expect("valid fallback price regex"));
static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$|USD|EUR|GBP").expect("valid currency regex"));

/// CSS selector lists, tried in order. Each entry may itself be a selector group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub title: Vec<String>,
    pub price: Vec<String>,
    pub image: Vec<String>,
    pub description: Vec<String>,
    pub sizes: Vec<String>,
    pub breadcrumbs: Vec<String>,
    /// Substring that marks an `img` source as a product shot
    pub image_marker: String,
    pub image_extensions: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            title: list(&[
                r#"h1[data-testid="product-title"]"#,
                "h1.product-title",
                r#"h1[class*="ProductTitle"]"#,
                r#"h1[class*="product-title"]"#,
                r#"[data-testid="product-name"]"#,
                ".product-name",
                "h1",
            ]),
            price: list(&[r#"[data-testid="product-price"], .product-price, [class*="price"]"#]),
            image: list(&[
                r#"img[data-testid="product-image"], img.product-image, img[class*="product-image"], .product-image img"#,
            ]),
            description: list(&[
                r#"[data-testid="product-description"], .product-description, [class*="description"]"#,
            ]),
            sizes: list(&[
                r#"[data-testid*="size"]"#,
                r#"button[class*="size"]"#,
                ".size-selector button",
                r#"[class*="SizeSelector"] button"#,
            ]),
            breadcrumbs: list(&[r#"[class*="breadcrumb"] a, nav[aria-label*="breadcrumb"] a"#]),
            image_marker: "product".to_string(),
            image_extensions: list(&[".jpg", ".png"]),
        }
    }
}

/// Outcome of price resolution. Both non-`Parsed` variants leave the price absent.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceOutcome {
    Parsed(f64),
    /// A price element exists but no number could be read from it
    Unparseable(String),
    NoElement,
}

impl PriceOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            PriceOutcome::Parsed(p) => Some(*p),
            _ => None,
        }
    }
}

type Strategy<T> = Box<dyn Fn(&Html) -> Option<T> + Send + Sync>;

/// Ordered strategies for one field
pub struct FallbackChain<T> {
    field: &'static str,
    strategies: Vec<Strategy<T>>,
}

impl<T> FallbackChain<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl Fn(&Html) -> Option<T> + Send + Sync + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn resolve(&self, doc: &Html) -> Option<T> {
        let found = self.strategies.iter().find_map(|s| s(doc));
        if found.is_none() {
            log::trace!("no strategy matched field '{}'", self.field);
        }
        found
    }
}

/// Compiled chains for every product field
pub struct ProductSelectors {
    pub title: FallbackChain<String>,
    pub price_text: FallbackChain<String>,
    pub image: FallbackChain<String>,
    pub description: FallbackChain<String>,
    pub sizes: FallbackChain<Vec<String>>,
    breadcrumbs: Vec<Selector>,
}

impl ProductSelectors {
    /// `site_domain` is the bare host (no "www.") used by the image scan
    pub fn compile(config: &SelectorConfig, site_domain: &str) -> CrawlerResult<Self> {
        let mut title = FallbackChain::new("title");
        for sel in compile_all(&config.title)? {
            title = title.then(move |doc| first_text(doc, &sel));
        }

        let mut price_text = FallbackChain::new("price");
        for sel in compile_all(&config.price)? {
            price_text = price_text.then(move |doc| doc.select(&sel).next().map(element_text));
        }

        let mut image = FallbackChain::new("image");
        for sel in compile_all(&config.image)? {
            image = image.then(move |doc| doc.select(&sel).next().and_then(image_source));
        }
        let img = compile("img")?;
        let marker = config.image_marker.clone();
        let domain = site_domain.to_string();
        let extensions = config.image_extensions.clone();
        image = image.then(move |doc| {
            doc.select(&img)
                .filter_map(image_source)
                .find(|src| looks_like_product_image(src, &marker, &domain, &extensions))
        });

        let mut description = FallbackChain::new("description");
        for sel in compile_all(&config.description)? {
            description = description.then(move |doc| first_text(doc, &sel));
        }

        let mut sizes = FallbackChain::new("sizes");
        for sel in compile_all(&config.sizes)? {
            sizes = sizes.then(move |doc| {
                let labels: Vec<String> = doc.select(&sel).map(element_text).collect();
                if labels.is_empty() {
                    return None;
                }
                Some(
                    labels
                        .into_iter()
                        .filter(|s| !s.is_empty() && s.chars().count() < MAX_SIZE_LABEL_CHARS)
                        .collect(),
                )
            });
        }

        Ok(Self {
            title,
            price_text,
            image,
            description,
            sizes,
            breadcrumbs: compile_all(&config.breadcrumbs)?,
        })
    }

    pub fn price(&self, doc: &Html) -> PriceOutcome {
        match self.price_text.resolve(doc) {
            Some(text) => parse_price(&text),
            None => PriceOutcome::NoElement,
        }
    }

    /// Breadcrumb labels from the first selector that matches anything
    pub fn breadcrumbs(&self, doc: &Html) -> Vec<String> {
        self.breadcrumbs
            .iter()
            .map(|sel| {
                doc.select(sel)
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .find(|crumbs| !crumbs.is_empty())
            .unwrap_or_default()
    }
}

/// Read a price from element text: first run of digits and commas with an optional decimal part.
/// A comma-only run (e.g. "Sizes, from $25") yields nothing, so a plain number is tried next.
pub fn parse_price(text: &str) -> PriceOutcome {
    let primary = PRICE_TOKEN
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok());
    let parsed = primary.or_else(|| {
        PRICE_FALLBACK
            .find(text)
            .and_then(|m| m.as_str().parse::<f64>().ok())
    });
    match parsed {
        Some(p) if p.is_finite() && p >= 0.0 => PriceOutcome::Parsed(p),
        _ => PriceOutcome::Unparseable(text.to_string()),
    }
}

/// First currency symbol or code in the visible text; "$" and no match both mean USD
pub fn detect_currency(doc: &Html) -> String {
    let text = visible_text(doc);
    match CURRENCY.find(&text).map(|m| m.as_str()) {
        Some("$") | None => "USD".to_string(),
        Some(code) => code.to_string(),
    }
}

fn visible_text(doc: &Html) -> String {
    static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("valid body selector"));
    match doc.select(&BODY).next() {
        Some(body) => body.text().collect(),
        None => doc.root_element().text().collect(),
    }
}

fn looks_like_product_image(src: &str, marker: &str, domain: &str, extensions: &[String]) -> bool {
    if src.contains(marker) {
        return true;
    }
    !domain.is_empty() && src.contains(domain) && extensions.iter().any(|ext| src.contains(ext.as_str()))
}

fn image_source(el: ElementRef<'_>) -> Option<String> {
    ["src", "data-src"]
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Text of the first element matching `sel`, if non-empty
fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Whitespace-collapsed text content
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile(selector: &str) -> CrawlerResult<Selector> {
    Selector::parse(selector).map_err(|e| {
        log::warn!("Failed to compile selector '{}': {}", selector, e);
        ExtractionError::InvalidSelector(selector.to_string()).into()
    })
}

fn compile_all(selectors: &[String]) -> CrawlerResult<Vec<Selector>> {
    selectors.iter().map(|s| compile(s)).collect()
}
