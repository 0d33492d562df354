use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, trace};
use url::Url;

use crate::crawler::errors::CrawlerResult;
use crate::crawler::renderer::{evaluate_as, scripts, RenderedPage};

/// Consecutive scrolls without height growth that mean the listing is exhausted
const NO_GROWTH_LIMIT: u32 = 3;
const PROGRESS_EVERY: usize = 10;

/// Why a walk stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ProductCap,
    EndOfContent,
    AttemptCap,
}

/// Result of one category walk
#[derive(Debug, Clone)]
pub struct ListingWalk {
    pub product_urls: Vec<String>,
    pub scroll_attempts: usize,
    pub stop_reason: StopReason,
}

/// Drives infinite scroll on an already loaded category page
pub struct ListingWalker {
    product_marker: String,
    scroll_settle: Duration,
    max_scroll_attempts: usize,
}

/// Order-preserving set of discovered product URLs plus scroll bookkeeping
struct WalkState {
    urls: Vec<String>,
    seen: HashSet<String>,
    last_height: f64,
    no_growth: u32,
}

impl WalkState {
    fn new() -> Self {
        Self {
            urls: Vec::new(),
            seen: HashSet::new(),
            last_height: 0.0,
            no_growth: 0,
        }
    }

    fn push(&mut self, url: String) -> bool {
        if self.seen.insert(url.clone()) {
            self.urls.push(url);
            true
        } else {
            false
        }
    }

    /// Returns true once the height has been flat long enough
    fn record_height(&mut self, height: f64) -> bool {
        if height == self.last_height {
            self.no_growth += 1;
        } else {
            self.no_growth = 0;
        }
        self.last_height = height;
        self.no_growth >= NO_GROWTH_LIMIT
    }
}

impl ListingWalker {
    pub fn new(product_marker: &str, scroll_settle: Duration, max_scroll_attempts: usize) -> Self {
        Self {
            product_marker: product_marker.to_string(),
            scroll_settle,
            max_scroll_attempts,
        }
    }

    /// Scroll until the cap, end of content, or the attempt limit; renderer errors propagate
    pub async fn walk<P>(&self, page: &P, category_url: &str, max_products: Option<usize>) -> CrawlerResult<ListingWalk>
    where
        P: RenderedPage + ?Sized,
    {
        info!("Starting to scroll and load products for {}", category_url);
        let base = Url::parse(category_url)?;
        let anchor_script = scripts::anchors_containing(&self.product_marker);
        let mut state = WalkState::new();
        let mut attempts = 0usize;

        let stop_reason = loop {
            if attempts >= self.max_scroll_attempts {
                break StopReason::AttemptCap;
            }

            page.evaluate(scripts::SCROLL_TO_BOTTOM).await?;
            page.sleep(self.scroll_settle).await;

            let height: f64 = evaluate_as(page, scripts::DOCUMENT_HEIGHT).await?;
            let hrefs: Vec<String> = evaluate_as(page, &anchor_script).await?;
            trace!("scroll {} height={} anchors={}", attempts + 1, height, hrefs.len());

            let mut capped = false;
            for href in hrefs {
                if let Some(url) = self.product_url(&href, &base) {
                    state.push(url);
                }
                if max_products.is_some_and(|cap| state.urls.len() >= cap) {
                    capped = true;
                    break;
                }
            }
            if capped {
                info!("Reached max products limit: {}", state.urls.len());
                break StopReason::ProductCap;
            }

            attempts += 1;
            if state.record_height(height) {
                info!("Reached end of page (no more content loading)");
                break StopReason::EndOfContent;
            }

            if attempts % PROGRESS_EVERY == 0 {
                info!("Scrolled {} times, found {} products so far...", attempts, state.urls.len());
            }
        };

        info!("Finished scrolling. Found {} unique product URLs", state.urls.len());
        debug!("walk of {} stopped: {:?} after {} scrolls", category_url, stop_reason, attempts);
        Ok(ListingWalk {
            product_urls: state.urls,
            scroll_attempts: attempts,
            stop_reason,
        })
    }

    /// Absolute HTTP(S) URL containing the product marker, or nothing
    fn product_url(&self, href: &str, base: &Url) -> Option<String> {
        let resolved = base.join(href.trim()).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        let url = resolved.to_string();
        url.contains(&self.product_marker).then_some(url)
    }
}
