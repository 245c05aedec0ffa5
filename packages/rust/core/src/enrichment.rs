//! Enrichment client.
//!
//! Asks an OpenAI-compatible chat completions endpoint for the submission deadline, fees,
//! and continent of each record, and caches parsed answers in storage keyed by everything
//! the model was shown plus the model itself. Failures are retried with backoff and finally degrade to
//! `Not found` fields; enrichment never fails a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use confscout_shared::{
    CONTINENTS, ConfScoutError, ConferenceRecord, EnrichedFields, EnrichmentSettings, FieldValue,
    Result,
};
use confscout_storage::Storage;

// ---------------------------------------------------------------------------
// Extraction service
// ---------------------------------------------------------------------------

/// What the extraction service gets to see about one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub title: String,
    pub location: String,
    /// Already truncated to the configured length.
    pub description: String,
}

/// A remote model that turns a record into a raw JSON-ish reply.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Identifier of the model answering; part of the cache key.
    fn model_id(&self) -> &str;

    /// One attempt. Returns the reply text exactly as the model produced it.
    async fn extract(&self, request: &ExtractionRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// `POST {base}/chat/completions` with a bearer credential.
pub struct ChatCompletionsService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsService {
    pub fn new(settings: &EnrichmentSettings, api_key: impl Into<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("confscout/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout);
        if let Some(proxy) = &settings.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| ConfScoutError::config(format!("invalid https proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ConfScoutError::Network(format!("client build: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.api_base_url),
            api_key: api_key.into(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl ExtractionService for ChatCompletionsService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: build_prompt(request),
            }],
            temperature: 0.1,
            max_tokens: 500,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConfScoutError::Enrichment(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(ConfScoutError::Enrichment(format!("HTTP {status}: {snippet}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ConfScoutError::Enrichment(format!("malformed response: {e}")))?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_owned())
            .ok_or_else(|| ConfScoutError::Enrichment("response had no choices".into()))
    }
}

fn build_prompt(request: &ExtractionRequest) -> String {
    format!(
        r#"Extract facts about the conference below and answer with a single JSON object only:

{{
  "Submission Deadline": "",
  "Submission Fee": "",
  "Registration Fee": "",
  "Continent": ""
}}

Submission Deadline: the paper submission deadline as YYYY/MM/DD, or "" if absent.
Submission Fee: the submission fee with currency (e.g. "$50"), or "" if absent or free.
Registration Fee: the registration fee with currency (e.g. "€300"), or "" if absent.
Continent: exactly one of {continents}, judged from the location.

Title: {title}
Location: {location}
Description: {description}

No explanations, no markdown."#,
        continents = CONTINENTS.join(", "),
        title = request.title,
        location = request.location,
        description = request.description,
    )
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

const KEY_DEADLINE: &str = "Submission Deadline";
const KEY_SUBMISSION_FEE: &str = "Submission Fee";
const KEY_REGISTRATION_FEE: &str = "Registration Fee";
const KEY_CONTINENT: &str = "Continent";

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid regex"));

static KEY_RES: LazyLock<[(&'static str, Regex); 4]> = LazyLock::new(|| {
    [KEY_DEADLINE, KEY_SUBMISSION_FEE, KEY_REGISTRATION_FEE, KEY_CONTINENT].map(|key| {
        let pattern = format!(r#""{}"\s*:\s*"([^"]*)""#, regex::escape(key));
        (key, Regex::new(&pattern).expect("valid regex"))
    })
});

/// Parse a model reply into fields.
///
/// Tries the whole reply as JSON (minus a code fence), then the outermost `{...}` slice,
/// then each key on its own. `None` when nothing usable is found.
pub fn parse_extraction(reply: &str) -> Option<EnrichedFields> {
    let trimmed = reply.trim();
    let text = FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());

    if let Some(fields) = fields_from_json(text) {
        return Some(fields);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Some(fields) = fields_from_json(&text[start..=end]) {
                return Some(fields);
            }
        }
    }

    let mut found = false;
    let mut pick = |key: &str| {
        KEY_RES
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, re)| re.captures(text))
            .and_then(|c| c.get(1))
            .map(|m| {
                found = true;
                m.as_str().to_owned()
            })
            .unwrap_or_default()
    };
    let deadline = pick(KEY_DEADLINE);
    let submission_fee = pick(KEY_SUBMISSION_FEE);
    let registration_fee = pick(KEY_REGISTRATION_FEE);
    let continent = pick(KEY_CONTINENT);

    found.then(|| build_fields(&deadline, &submission_fee, &registration_fee, &continent))
}

fn fields_from_json(text: &str) -> Option<EnrichedFields> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let get = |key: &str| match object.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(build_fields(
        &get(KEY_DEADLINE),
        &get(KEY_SUBMISSION_FEE),
        &get(KEY_REGISTRATION_FEE),
        &get(KEY_CONTINENT),
    ))
}

fn build_fields(
    deadline: &str,
    submission_fee: &str,
    registration_fee: &str,
    continent: &str,
) -> EnrichedFields {
    EnrichedFields {
        submission_deadline: FieldValue::extracted(deadline),
        submission_fee: FieldValue::extracted(submission_fee),
        registration_fee: FieldValue::extracted(registration_fee),
        continent: canonical_continent(continent),
    }
}

fn canonical_continent(raw: &str) -> FieldValue {
    let raw = raw.trim();
    CONTINENTS
        .iter()
        .find(|c| c.eq_ignore_ascii_case(raw))
        .map_or(FieldValue::NotFound, |c| FieldValue::Found((*c).to_owned()))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Where an [`Enrichment`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentSource {
    Cache,
    Service,
    /// Every attempt failed; fields are all `Not found`.
    Degraded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub fields: EnrichedFields,
    pub source: EnrichmentSource,
}

/// Counters for one client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub cache_hits: usize,
    pub service_calls: usize,
    pub degraded: usize,
}

/// Cache key for `request` answered by `model`.
///
/// Covers every prompt input, so a hit is always the answer to the same question.
pub fn cache_key(request: &ExtractionRequest, model: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [&request.title, &request.location, &request.description] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cached, retrying, concurrency-bounded front for an [`ExtractionService`].
pub struct EnrichmentClient {
    service: Arc<dyn ExtractionService>,
    cache: Option<Arc<Storage>>,
    settings: EnrichmentSettings,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
    cache_hits: AtomicUsize,
    service_calls: AtomicUsize,
    degraded: AtomicUsize,
}

impl EnrichmentClient {
    pub fn new(
        service: Arc<dyn ExtractionService>,
        cache: Option<Arc<Storage>>,
        settings: EnrichmentSettings,
        cancel: CancellationToken,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            service,
            cache,
            settings,
            slots,
            cancel,
            cache_hits: AtomicUsize::new(0),
            service_calls: AtomicUsize::new(0),
            degraded: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> EnrichmentStats {
        EnrichmentStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            service_calls: self.service_calls.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Enrich many records concurrently. Results come back in input order.
    pub async fn enrich_all(&self, records: &[ConferenceRecord]) -> Vec<Enrichment> {
        let results = join_all(records.iter().map(|record| self.enrich(record))).await;
        let stats = self.stats();
        info!(
            records = records.len(),
            cache_hits = stats.cache_hits,
            service_calls = stats.service_calls,
            degraded = stats.degraded,
            "enrichment complete"
        );
        results
    }

    /// Enrich one record. Never fails; exhausted retries degrade to `Not found`.
    #[instrument(skip_all, fields(title = %record.title))]
    pub async fn enrich(&self, record: &ConferenceRecord) -> Enrichment {
        if self.cancel.is_cancelled() {
            return cancelled();
        }

        let request = ExtractionRequest {
            title: record.title.clone(),
            location: record.location.clone(),
            description: truncate_chars(&record.description, self.settings.max_description_chars)
                .to_owned(),
        };

        let key = cache_key(&request, self.service.model_id());
        if self.settings.cache_mode.reads() {
            if let Some(fields) = self.lookup(&key).await {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!("cache hit");
                return Enrichment {
                    fields,
                    source: EnrichmentSource::Cache,
                };
            }
        }

        let max_attempts = self.settings.max_attempts.max(1);
        for attempt in 0..max_attempts {
            if attempt > 0 && !self.settings.backoff.wait(attempt - 1, &self.cancel).await {
                return cancelled();
            }

            let outcome = {
                let _slot = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return cancelled(),
                    slot = self.slots.acquire() => match slot {
                        Ok(slot) => slot,
                        Err(_) => return cancelled(),
                    },
                };
                let call = async {
                    self.service_calls.fetch_add(1, Ordering::Relaxed);
                    self.service.extract(&request).await
                };
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return cancelled(),
                    outcome = call => outcome,
                }
            };

            match outcome.and_then(|reply| {
                parse_extraction(&reply).ok_or_else(|| {
                    let snippet: String = reply.chars().take(120).collect();
                    ConfScoutError::Enrichment(format!("unparseable reply: {snippet}"))
                })
            }) {
                Ok(fields) => {
                    if self.settings.cache_mode.writes() {
                        self.store(&key, &fields).await;
                    }
                    return Enrichment {
                        fields,
                        source: EnrichmentSource::Service,
                    };
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, max_attempts, error = %e, "extraction attempt failed");
                }
            }
        }

        self.degraded.fetch_add(1, Ordering::Relaxed);
        warn!(max_attempts, "extraction gave up, marking fields as not found");
        Enrichment {
            fields: EnrichedFields::not_found(),
            source: EnrichmentSource::Degraded,
        }
    }

    async fn lookup(&self, key: &str) -> Option<EnrichedFields> {
        let storage = self.cache.as_ref()?;
        match storage.get_cached(key).await {
            Ok(Some(entry)) => match serde_json::from_str(&entry.value_json) {
                Ok(fields) => Some(fields),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cache lookup failed");
                None
            }
        }
    }

    async fn store(&self, key: &str, fields: &EnrichedFields) {
        let Some(storage) = &self.cache else {
            return;
        };
        let value_json = match serde_json::to_string(fields) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not encode cache entry");
                return;
            }
        };
        if let Err(e) = storage
            .put_cached(key, self.service.model_id(), &value_json)
            .await
        {
            warn!(error = %e, "cache write failed");
        }
    }
}

fn cancelled() -> Enrichment {
    Enrichment {
        fields: EnrichedFields::not_found(),
        source: EnrichmentSource::Cancelled,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
