//! End-to-end `run` pipeline: listing → dedup → detail fetch → enrich → append.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use confscout_crawler::{FetchResult, Tier, TieredFetcher};
use confscout_discovery::{AnnouncementParser, RecordParser};
use confscout_shared::{
    AppConfig, CacheMode, ConfScoutError, ConferenceRecord, EnrichmentSettings, FetchConfig,
    Result,
};
use confscout_storage::{Dataset, DatasetFile, Storage};

use crate::dedup::filter_new;
use crate::enrichment::{
    ChatCompletionsService, EnrichmentClient, EnrichmentSource, ExtractionService,
};

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Process every listed record, even those already in the dataset.
    pub force_fetch: bool,
    pub cache_mode: CacheMode,
}

/// Counts for one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    /// Records found on the listing page.
    pub listed: usize,
    /// Records left after deduplication.
    pub candidates: usize,
    pub details_fetched: usize,
    pub detail_failures: usize,
    pub enriched_from_cache: usize,
    pub enriched_from_service: usize,
    pub enrichment_degraded: usize,
    pub appended: usize,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Everything a [`Pipeline`] drives.
pub struct PipelineParts {
    pub listing_url: Url,
    pub fetcher: TieredFetcher,
    pub parser: Arc<dyn RecordParser>,
    pub enricher: EnrichmentClient,
    pub dataset: DatasetFile,
    /// Run history; `None` skips it.
    pub history: Option<Arc<Storage>>,
    pub cancel: CancellationToken,
}

/// The fetch-and-enrich pipeline for one listing source.
pub struct Pipeline {
    parts: PipelineParts,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self { parts }
    }

    /// Wire up real transports, the chat-completions service, and storage from config.
    pub async fn from_config(
        config: &AppConfig,
        options: &RunOptions,
        api_key: String,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listing_url = Url::parse(&config.source.listing_url).map_err(|e| {
            ConfScoutError::validation(format!(
                "invalid listing_url {:?}: {e}",
                config.source.listing_url
            ))
        })?;

        let fetcher = TieredFetcher::new(FetchConfig::from(config), cancel.clone())?;

        let mut settings = EnrichmentSettings::from(config);
        if settings.cache_mode != CacheMode::Disabled {
            settings.cache_mode = options.cache_mode;
        }
        let service: Arc<dyn ExtractionService> =
            Arc::new(ChatCompletionsService::new(&settings, api_key)?);

        let storage = Arc::new(Storage::open(Path::new(&config.cache.path)).await?);
        let cache = settings.cache_mode.writes().then(|| storage.clone());
        let enricher = EnrichmentClient::new(service, cache, settings, cancel.clone());

        Ok(Self::new(PipelineParts {
            listing_url,
            fetcher,
            parser: Arc::new(AnnouncementParser),
            enricher,
            dataset: DatasetFile::new(&config.output.dataset),
            history: Some(storage),
            cancel,
        }))
    }

    /// Run once and record the outcome in the run history.
    ///
    /// A cancelled run returns [`ConfScoutError::Cancelled`] and appends nothing.
    #[instrument(skip_all, fields(listing = %self.parts.listing_url))]
    pub async fn run(
        &self,
        options: &RunOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let run_id = match &self.parts.history {
            Some(storage) => Some(storage.insert_run().await?),
            None => None,
        };

        let result = self
            .run_inner(run_id.clone().unwrap_or_default(), options, progress)
            .await;

        if let (Some(storage), Some(id)) = (&self.parts.history, &run_id) {
            let (outcome, stats_json) = match &result {
                Ok(summary) => (
                    "completed",
                    serde_json::to_string(summary).unwrap_or_else(|_| "{}".into()),
                ),
                Err(e) if e.is_cancelled() => ("cancelled", "{}".into()),
                Err(e) => ("failed", serde_json::json!({ "error": e.to_string() }).to_string()),
            };
            if let Err(e) = storage.finish_run(id, outcome, &stats_json).await {
                warn!(error = %e, "could not record run outcome");
            }
        }

        if let Ok(summary) = &result {
            progress.done(summary);
            info!(
                run_id = %summary.run_id,
                listed = summary.listed,
                candidates = summary.candidates,
                appended = summary.appended,
                degraded = summary.enrichment_degraded,
                elapsed_ms = summary.elapsed_ms,
                "run complete"
            );
        }
        result
    }

    async fn run_inner(
        &self,
        run_id: String,
        options: &RunOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let parts = &self.parts;
        let mut summary = RunSummary {
            run_id,
            ..RunSummary::default()
        };

        // --- Phase 1: Listing ---
        progress.phase("Fetching listing");
        let listing = match parts.fetcher.fetch(parts.listing_url.as_str()).await {
            FetchResult::Success { body, .. } => body,
            FetchResult::Cancelled => return Err(ConfScoutError::Cancelled),
            FetchResult::Failure {
                class,
                tier,
                attempts,
                message,
            } => {
                warn!(%class, %tier, attempts, %message, "listing unavailable, nothing to do");
                summary.elapsed_ms = elapsed_ms(start);
                return Ok(summary);
            }
        };

        let listed = parts.parser.parse_listing(&listing, &parts.listing_url);
        summary.listed = listed.len();

        // --- Phase 2: Dedup ---
        progress.phase("Deduplicating");
        let mut records = if options.force_fetch {
            filter_new(listed, &Dataset::new())
        } else {
            let existing = parts.dataset.load_existing()?;
            filter_new(listed, &existing)
        };
        summary.candidates = records.len();
        info!(
            listed = summary.listed,
            candidates = summary.candidates,
            force_fetch = options.force_fetch,
            "listing parsed"
        );
        if records.is_empty() {
            summary.elapsed_ms = elapsed_ms(start);
            return Ok(summary);
        }

        // --- Phase 3: Details ---
        progress.phase("Fetching details");
        self.fetch_details(&mut records, &mut summary).await;
        if parts.cancel.is_cancelled() {
            return Err(ConfScoutError::Cancelled);
        }

        // --- Phase 4: Enrichment ---
        progress.phase("Enriching");
        let enrichments = parts.enricher.enrich_all(&records).await;
        if parts.cancel.is_cancelled() {
            return Err(ConfScoutError::Cancelled);
        }
        for (record, enrichment) in records.iter_mut().zip(enrichments) {
            match enrichment.source {
                EnrichmentSource::Cache => summary.enriched_from_cache += 1,
                EnrichmentSource::Service => summary.enriched_from_service += 1,
                EnrichmentSource::Degraded => summary.enrichment_degraded += 1,
                EnrichmentSource::Cancelled => return Err(ConfScoutError::Cancelled),
            }
            record.apply_enrichment(enrichment.fields);
        }

        // --- Phase 5: Persist ---
        progress.phase("Appending to dataset");
        summary.appended = parts.dataset.append(&records)?;
        summary.elapsed_ms = elapsed_ms(start);
        Ok(summary)
    }

    /// Fetch each record's detail page and keep its description when it is longer.
    async fn fetch_details(&self, records: &mut [ConferenceRecord], summary: &mut RunSummary) {
        let listing_host = self.parts.listing_url.host_str();
        let targets: Vec<(usize, String)> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                Url::parse(&record.link).is_ok_and(|link| link.host_str() == listing_host)
            })
            .map(|(i, record)| (i, record.link.clone()))
            .collect();

        let addresses: Vec<String> = targets.iter().map(|(_, link)| link.clone()).collect();
        let results = self.parts.fetcher.fetch_all(&addresses).await;

        for ((index, link), result) in targets.into_iter().zip(results) {
            let record = &mut records[index];
            match result {
                FetchResult::Success { body, tier } => {
                    summary.details_fetched += 1;
                    if let Some(description) = self.parts.parser.parse_detail(&body) {
                        if description.chars().count() > record.description.chars().count() {
                            record.description = description;
                        }
                    }
                    if tier != Tier::Direct {
                        info!(%link, %tier, "detail fetched after escalation");
                    }
                }
                FetchResult::Failure { class, message, .. } => {
                    summary.detail_failures += 1;
                    warn!(%link, %class, %message, "detail fetch failed, keeping listing fields");
                }
                FetchResult::Cancelled => {}
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
