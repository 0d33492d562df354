//! Narrow capability the crawler needs from a browser: open a page, navigate it,
//! run a script and read back JSON, and pause.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::crawler::errors::{CrawlerResult, RenderError};

/// When a navigation counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// `DOMContentLoaded` reached; used for product pages plus a settle delay
    DomReady,
    /// No new network resources for a quiet window; used for category pages
    NetworkIdle,
}

/// Launches pages. One page is held per category.
#[async_trait]
pub trait Renderer: Send + Sync {
    type Page: RenderedPage;

    async fn new_page(&self) -> CrawlerResult<Self::Page>;

    /// Release the browser itself
    async fn shutdown(&self) -> CrawlerResult<()> {
        Ok(())
    }
}

/// A single browser tab
#[async_trait]
pub trait RenderedPage: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitPolicy, timeout: Duration) -> CrawlerResult<()>;

    async fn evaluate(&self, script: &str) -> CrawlerResult<Value>;

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    async fn close(self) -> CrawlerResult<()>
    where
        Self: Sized;
}

/// Evaluate a script and deserialize its result
pub async fn evaluate_as<T, P>(page: &P, script: &str) -> CrawlerResult<T>
where
    T: DeserializeOwned,
    P: RenderedPage + ?Sized,
{
    let value = page.evaluate(script).await?;
    serde_json::from_value(value).map_err(|e| {
        RenderError::UnexpectedValue(format!("{} (script: {})", e, truncate(script, 60))).into()
    })
}

fn truncate(s: &str, max: usize) -> String {
    let flat: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Scripts shared by the walker and the extractor
pub mod scripts {
    pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";
    pub const DOCUMENT_HEIGHT: &str = "document.body.scrollHeight";
    pub const OUTER_HTML: &str = "document.documentElement.outerHTML";
    pub const LOCATION_HREF: &str = "window.location.href";
    pub const READY_STATE: &str = "document.readyState";

    /// Absolute hrefs of every anchor whose URL contains `marker`
    pub fn anchors_containing(marker: &str) -> String {
        let marker = serde_json::Value::String(marker.to_string()).to_string();
        format!(
            r#"(() => {{
                const marker = {marker};
                return Array.from(document.querySelectorAll('a[href*=' + JSON.stringify(marker) + ']'))
                    .map(a => a.href)
                    .filter(href => typeof href === 'string' && href.includes(marker));
            }})()"#
        )
    }

    /// Number of resources the page has requested so far
    pub const RESOURCE_COUNT: &str = "performance.getEntriesByType('resource').length";
}
