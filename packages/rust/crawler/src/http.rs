//! Plain-HTTP tiers: the pooled direct transport and the fresh-session serial transport.

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue,
    UPGRADE_INSECURE_REQUESTS,
};
use reqwest::{Client, ClientBuilder, Proxy};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use confscout_shared::{ConfScoutError, FetchConfig, Result};

use crate::transport::{FetchError, FetchTransport, Tier, classify_response};

/// Headers a desktop browser sends on a top-level navigation.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers
}

/// Client settings common to both HTTP tiers.
fn client_builder(config: &FetchConfig) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(browser_headers())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(config.timeout)
        .cookie_store(true);

    if let Some(proxy) = &config.http_proxy {
        builder = builder.proxy(
            Proxy::http(proxy)
                .map_err(|e| ConfScoutError::Network(format!("invalid http proxy {proxy}: {e}")))?,
        );
    }
    if let Some(proxy) = &config.https_proxy {
        builder = builder.proxy(
            Proxy::https(proxy)
                .map_err(|e| ConfScoutError::Network(format!("invalid https proxy {proxy}: {e}")))?,
        );
    }
    Ok(builder)
}

/// GET `url` and classify the outcome.
async fn get_page(client: &Client, url: &Url) -> std::result::Result<String, FetchError> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(&e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::transient(format!("body read failed: {e}")))?;

    classify_response(status, &body)?;
    Ok(body)
}

// ---------------------------------------------------------------------------
// Tier A
// ---------------------------------------------------------------------------

/// Connection-pooled client shared by every concurrent task.
pub struct DirectTransport {
    client: Client,
}

impl DirectTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = client_builder(config)?
            .build()
            .map_err(|e| ConfScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchTransport for DirectTransport {
    fn tier(&self) -> Tier {
        Tier::Direct
    }

    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError> {
        get_page(&self.client, url).await
    }
}

// ---------------------------------------------------------------------------
// Tier C
// ---------------------------------------------------------------------------

/// A brand-new, unpooled session per attempt, one attempt at a time.
///
/// Each attempt first loads the site origin so the session picks up whatever cookies the
/// site hands out to a first-time visitor.
pub struct SerialTransport {
    config: FetchConfig,
    lock: Mutex<()>,
}

impl SerialTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        // fail at startup rather than on the first escalation
        client_builder(config)?;
        Ok(Self {
            config: config.clone(),
            lock: Mutex::new(()),
        })
    }

    fn fresh_client(&self) -> std::result::Result<Client, FetchError> {
        client_builder(&self.config)
            .and_then(|builder| {
                builder
                    .pool_max_idle_per_host(0)
                    .build()
                    .map_err(|e| ConfScoutError::Network(e.to_string()))
            })
            .map_err(|e| FetchError::fatal(format!("failed to build serial client: {e}")))
    }
}

#[async_trait]
impl FetchTransport for SerialTransport {
    fn tier(&self) -> Tier {
        Tier::Serial
    }

    async fn fetch(&self, url: &Url) -> std::result::Result<String, FetchError> {
        let _guard = self.lock.lock().await;
        let client = self.fresh_client()?;

        let origin = url.origin().ascii_serialization();
        if url.as_str().trim_end_matches('/') != origin {
            match client.get(&origin).send().await {
                Ok(response) => debug!(%origin, status = %response.status(), "session warm-up"),
                Err(e) => debug!(%origin, error = %e, "session warm-up failed"),
            }
            if !self.config.rate_limit.is_zero() {
                tokio::time::sleep(self.config.rate_limit).await;
            }
        }

        get_page(&client, url).await
    }
}
