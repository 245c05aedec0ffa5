//! Headless-browser tier, rendering pages through Chromium via `chromiumoxide`.
//!
//! Each attempt launches its own browser process and closes it before returning.
//! Callers must serialize attempts; the orchestrator does so with a one-permit semaphore.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use confscout_shared::FetchConfig;

use crate::transport::{FetchError, FetchTransport, Tier, is_challenge_page};

/// How often the rendered DOM is re-read while a challenge is pending.
const CHALLENGE_POLL: Duration = Duration::from_millis(500);

pub struct BrowserTransport {
    user_agent: String,
    timeout: Duration,
    challenge_wait: Duration,
    proxy: Option<String>,
}

impl BrowserTransport {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.timeout,
            challenge_wait: config.browser_wait,
            proxy: config.https_proxy.clone().or_else(|| config.http_proxy.clone()),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", self.user_agent));
        if let Some(proxy) = &self.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        builder
            .build()
            .map_err(|e| FetchError::transient(format!("invalid browser config: {e}")))
    }

    /// Navigate and wait until the page is no longer a challenge interstitial.
    async fn render(&self, browser: &Browser, url: &Url) -> Result<String, FetchError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::transient(format!("failed to open tab: {e}")))?;
        page.goto(url.as_str())
            .await
            .map_err(|e| FetchError::transient(format!("navigation failed: {e}")))?;

        let deadline = Instant::now() + self.challenge_wait;
        loop {
            let content = page
                .content()
                .await
                .map_err(|e| FetchError::transient(format!("failed to read DOM: {e}")))?;
            if !is_challenge_page(&content) {
                if content.trim().is_empty() {
                    return Err(FetchError::transient("rendered page is empty"));
                }
                return Ok(content);
            }
            if Instant::now() >= deadline {
                return Err(FetchError::blocked("challenge did not clear in the browser"));
            }
            debug!(%url, "challenge pending, waiting");
            tokio::time::sleep(CHALLENGE_POLL).await;
        }
    }
}

#[async_trait]
impl FetchTransport for BrowserTransport {
    fn tier(&self) -> Tier {
        Tier::Browser
    }

    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(|e| FetchError::transient(format!("failed to launch browser: {e}")))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let budget = self.timeout + self.challenge_wait;
        let result = tokio::time::timeout(budget, self.render(&browser, url))
            .await
            .unwrap_or_else(|_| Err(FetchError::transient("browser render timed out")));

        if let Err(e) = browser.close().await {
            warn!(error = %e, "failed to close browser cleanly");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser process did not exit cleanly");
        }
        events.abort();

        result
    }
}
