//! Application configuration for ConfScout.
//!
//! User config lives at `~/.confscout/confscout.toml` unless `--config` points elsewhere.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::{ConfScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "confscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".confscout";

/// Browser-like user agent sent by the HTTP tiers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Config structs (matching confscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where announcements are listed.
    #[serde(default)]
    pub source: SourceConfig,

    /// Tiered fetch settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Extraction service settings.
    #[serde(default)]
    pub enrichment: EnrichmentSection,

    /// Response cache.
    #[serde(default)]
    pub cache: CacheSection,

    /// Outbound proxies shared by every HTTP client.
    #[serde(default)]
    pub proxy: ProxySection,

    /// Output files.
    #[serde(default)]
    pub output: OutputSection,

    /// Whole-run limits.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Announcement listing page.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
        }
    }
}

fn default_listing_url() -> String {
    "https://www.ssrn.com/index.cfm/en/janda/professional-announcements/?annsNet=203#AnnType_1"
        .into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Maximum in-flight direct/serial fetches.
    #[serde(default = "default_fetch_concurrency")]
    pub max_concurrent: usize,

    /// Per-request timeout.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Attempts allowed in the direct tier.
    #[serde(default = "default_direct_retries")]
    pub direct_retries: u32,

    /// Attempts allowed in the serial tier.
    #[serde(default = "default_serial_retries")]
    pub serial_retries: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Politeness delay before each direct/serial attempt.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Whether the headless-browser tier may be used.
    #[serde(default = "default_enable_browser")]
    pub enable_browser: bool,

    /// How long the browser tier waits for a challenge page to clear.
    #[serde(default = "default_browser_wait")]
    pub browser_wait_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_fetch_concurrency(),
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            direct_retries: default_direct_retries(),
            serial_retries: default_serial_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            rate_limit_ms: default_rate_limit(),
            enable_browser: default_enable_browser(),
            browser_wait_secs: default_browser_wait(),
        }
    }
}

fn default_enable_browser() -> bool {
    true
}

fn default_fetch_concurrency() -> usize {
    3
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}
fn default_direct_retries() -> u32 {
    3
}
fn default_serial_retries() -> u32 {
    2
}
fn default_backoff_base() -> u64 {
    1000
}
fn default_backoff_max() -> u64 {
    16_000
}
fn default_rate_limit() -> u64 {
    500
}
fn default_browser_wait() -> u64 {
    15
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum concurrent extraction calls.
    #[serde(default = "default_enrichment_concurrency")]
    pub max_concurrent: usize,

    /// Attempts per record before falling back to "Not found".
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,

    /// Descriptions longer than this are cut before sending.
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_concurrent: default_enrichment_concurrency(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_enrichment_timeout(),
            max_description_chars: default_max_description_chars(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.deepseek.com/v1".into()
}
fn default_api_key_env() -> String {
    "CONFSCOUT_API_KEY".into()
}
fn default_model() -> String {
    "deepseek-chat".into()
}
fn default_enrichment_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_enrichment_timeout() -> u64 {
    60
}
fn default_max_description_chars() -> usize {
    2000
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// libSQL database file.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_path() -> String {
    "output/confscout-cache.db".into()
}

/// `[proxy]` section. Empty strings mean "no proxy".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default)]
    pub http: String,

    #[serde(default)]
    pub https: String,
}

impl ProxySection {
    /// Proxy for plain-HTTP requests, if configured.
    pub fn http(&self) -> Option<&str> {
        Some(self.http.trim()).filter(|p| !p.is_empty())
    }

    /// Proxy for HTTPS requests, if configured.
    pub fn https(&self) -> Option<&str> {
        Some(self.https.trim()).filter(|p| !p.is_empty())
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Append-only dataset file.
    #[serde(default = "default_dataset_path")]
    pub dataset: String,

    /// Filtered, sorted snapshot written by `confscout export`.
    #[serde(default = "default_export_path")]
    pub export: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dataset: default_dataset_path(),
            export: default_export_path(),
        }
    }
}

fn default_dataset_path() -> String {
    "output/conferences.csv".into()
}
fn default_export_path() -> String {
    "output/conferences-sorted.csv".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Cancel the run after this many seconds. 0 disables the deadline.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl PipelineSection {
    pub fn deadline(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration consumed by the tiered fetcher and its transports.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub user_agent: String,
    pub direct_retries: u32,
    pub serial_retries: u32,
    pub backoff: Backoff,
    pub rate_limit: Duration,
    pub enable_browser: bool,
    pub browser_wait: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            max_concurrent: fetch.max_concurrent.max(1),
            timeout: Duration::from_secs(fetch.timeout_secs),
            user_agent: fetch.user_agent.clone(),
            direct_retries: fetch.direct_retries.max(1),
            serial_retries: fetch.serial_retries.max(1),
            backoff: Backoff::new(
                Duration::from_millis(fetch.backoff_base_ms),
                Duration::from_millis(fetch.backoff_max_ms),
            ),
            rate_limit: Duration::from_millis(fetch.rate_limit_ms),
            enable_browser: fetch.enable_browser,
            browser_wait: Duration::from_secs(fetch.browser_wait_secs),
            http_proxy: config.proxy.http().map(str::to_owned),
            https_proxy: config.proxy.https().map(str::to_owned),
        }
    }
}

/// How the enrichment client uses the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Look up before calling, store after a successful call.
    #[default]
    ReadWrite,
    /// Skip lookups but still store fresh results (forced re-enrichment).
    Refresh,
    /// Neither read nor write.
    Disabled,
}

impl CacheMode {
    pub fn reads(self) -> bool {
        self == Self::ReadWrite
    }

    pub fn writes(self) -> bool {
        self != Self::Disabled
    }
}

/// Runtime enrichment configuration.
#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub api_base_url: String,
    pub model: String,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub max_description_chars: usize,
    pub backoff: Backoff,
    pub cache_mode: CacheMode,
    pub https_proxy: Option<String>,
}

impl From<&AppConfig> for EnrichmentSettings {
    fn from(config: &AppConfig) -> Self {
        let enrichment = &config.enrichment;
        Self {
            api_base_url: enrichment.api_base_url.trim_end_matches('/').to_owned(),
            model: enrichment.model.clone(),
            max_concurrent: enrichment.max_concurrent.max(1),
            max_attempts: enrichment.max_attempts.max(1),
            timeout: Duration::from_secs(enrichment.timeout_secs),
            max_description_chars: enrichment.max_description_chars,
            backoff: Backoff::new(
                Duration::from_millis(enrichment.backoff_base_ms),
                Duration::from_millis(enrichment.backoff_max_ms),
            ),
            cache_mode: if config.cache.enabled {
                CacheMode::ReadWrite
            } else {
                CacheMode::Disabled
            },
            https_proxy: config.proxy.https().map(str::to_owned),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.confscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConfScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.confscout/confscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfScoutError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| ConfScoutError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Write a default config file to `path` (or the default location) and return where it went.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfScoutError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConfScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        let listing = url::Url::parse(&self.source.listing_url).map_err(|e| {
            ConfScoutError::validation(format!(
                "listing_url {:?} is not a valid URL: {e}",
                self.source.listing_url
            ))
        })?;
        if !matches!(listing.scheme(), "http" | "https") {
            return Err(ConfScoutError::validation(format!(
                "listing_url must be http(s), got {}",
                listing.scheme()
            )));
        }
        if self.fetch.backoff_max_ms < self.fetch.backoff_base_ms {
            return Err(ConfScoutError::validation(
                "fetch.backoff_max_ms must not be smaller than fetch.backoff_base_ms",
            ));
        }
        if self.enrichment.model.trim().is_empty() {
            return Err(ConfScoutError::validation("enrichment.model must not be empty"));
        }
        Ok(())
    }
}

/// Read the extraction-service API key from the configured env var.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.enrichment.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_owned()),
        _ => Err(ConfScoutError::config(format!(
            "extraction service API key not found. Set the {var_name} environment variable."
        ))),
    }
}
