// Headless Chromium renderer. Honors CHROME_EXECUTABLE / renderer.chrome_executable
// and otherwise lets chromiumoxide locate an installed browser.
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::crawler::config::RendererConfig;
use crate::crawler::errors::{CrawlerResult, RenderError};
use crate::crawler::renderer::{scripts, RenderedPage, Renderer, WaitPolicy};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

pub struct ChromeRenderer {
    browser: Mutex<Browser>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChromeRenderer {
    /// Launch the browser and spawn the CDP event handler
    pub async fn launch(config: &RendererConfig) -> CrawlerResult<Self> {
        let chrome_exec = config
            .chrome_executable
            .clone()
            .or_else(|| std::env::var("CHROME_EXECUTABLE").ok())
            .map(PathBuf::from);

        let mut flags = vec![
            String::from("--no-sandbox"),
            String::from("--disable-gpu"),
            String::from("--disable-dev-shm-usage"),
            String::from("--disable-extensions"),
            String::from("--disable-background-networking"),
            format!("--user-agent={}", config.user_agent),
        ];
        if let Some(profile) = &config.user_data_dir {
            flags.push(format!("--user-data-dir={}", profile));
        }

        let mut builder = BrowserConfig::builder()
            .args(flags)
            .request_timeout(Duration::from_millis(config.product_timeout_ms));
        if let Some(exec) = &chrome_exec {
            info!("[chrome_renderer] using Chromium at {}", exec.display());
            builder = builder.chrome_executable(exec.clone());
        }
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| RenderError::LaunchFailed(format!("failed to build BrowserConfig: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RenderError::LaunchFailed(format!("failed to launch Chromium: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(r) = handler.next().await {
                if r.is_err() {
                    break;
                }
            }
        });

        info!("[chrome_renderer] browser launched (headless={})", config.headless);
        Ok(Self {
            browser: Mutex::new(browser),
            handler_task: Mutex::new(Some(handler_task)),
        })
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    type Page = ChromePage;

    async fn new_page(&self) -> CrawlerResult<ChromePage> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::PageUnavailable(e.to_string()))?;
        debug!("[chrome_renderer] opened page");
        Ok(ChromePage { page })
    }

    async fn shutdown(&self) -> CrawlerResult<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("[chrome_renderer] browser close failed: {}", e);
        }
        let _ = browser.wait().await;
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        info!("[chrome_renderer] browser closed");
        Ok(())
    }
}

pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    async fn wait_for_dom_ready(&self) -> CrawlerResult<()> {
        loop {
            let state = self.evaluate(scripts::READY_STATE).await?;
            if state.as_str().map(|s| s != "loading").unwrap_or(false) {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Resource count stays flat for a quiet window
    async fn wait_for_network_idle(&self) -> CrawlerResult<()> {
        self.wait_for_dom_ready().await?;
        let mut last_count = u64::MAX;
        let mut stable_since = Instant::now();
        loop {
            let count = self
                .evaluate(scripts::RESOURCE_COUNT)
                .await?
                .as_u64()
                .unwrap_or(0);
            if count != last_count {
                last_count = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= NETWORK_QUIET_WINDOW {
                trace!("[chrome_renderer] network idle at {} resources", count);
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl RenderedPage for ChromePage {
    async fn navigate(&self, url: &str, wait: WaitPolicy, timeout: Duration) -> CrawlerResult<()> {
        debug!("[chrome_renderer] navigate {} ({:?}, {:?})", url, wait, timeout);
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| RenderError::NavigationFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            match wait {
                WaitPolicy::DomReady => self.wait_for_dom_ready().await,
                WaitPolicy::NetworkIdle => self.wait_for_network_idle().await,
            }
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn evaluate(&self, script: &str) -> CrawlerResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| RenderError::ScriptFailed(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn close(self) -> CrawlerResult<()> {
        self.page
            .close()
            .await
            .map_err(|e| RenderError::PageUnavailable(format!("close failed: {}", e)).into())
    }
}
