//! Tiered fetch orchestrator.
//!
//! Every page goes through an explicit state machine:
//!
//! ```text
//! PendingDirect ──blocked / budget spent──▶ PendingBrowser ──any failure──▶ PendingSerial
//!      │                                         │ (skipped when disabled)        │
//!      └──fatal──▶ Exhausted ◀───────────────────┴──────────terminal failure──────┘
//! ```
//!
//! Any successful attempt moves the task to `Done`. A task never returns to an earlier tier.
//! Direct and serial attempts share a semaphore of `max_concurrent` permits; browser attempts
//! take a separate single permit instead, so at most one browser render runs at a time.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use confscout_shared::{FetchConfig, Result};

use crate::browser::BrowserTransport;
use crate::http::{DirectTransport, SerialTransport};
use crate::transport::{ErrorClass, FetchError, FetchTransport, Tier};

// ---------------------------------------------------------------------------
// Task / result types
// ---------------------------------------------------------------------------

/// One page to retrieve, owned by the orchestrator until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub url: Url,
    /// Tier to start from.
    pub tier_hint: Tier,
    /// Attempts made so far, across all tiers.
    pub attempts: u32,
}

impl FetchTask {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            tier_hint: Tier::Direct,
            attempts: 0,
        }
    }

    pub fn starting_at(mut self, tier: Tier) -> Self {
        self.tier_hint = tier;
        self
    }
}

/// Terminal outcome of a [`FetchTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        body: String,
        tier: Tier,
    },
    Failure {
        class: ErrorClass,
        tier: Tier,
        attempts: u32,
        message: String,
    },
    Cancelled,
}

impl FetchResult {
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Success { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchState {
    PendingDirect,
    PendingBrowser,
    PendingSerial,
    Exhausted { tier: Tier, error: FetchError },
    Done { tier: Tier, body: String },
}

impl FetchState {
    fn start(hint: Tier) -> Self {
        match hint {
            Tier::Direct => Self::PendingDirect,
            Tier::Browser => Self::PendingBrowser,
            Tier::Serial => Self::PendingSerial,
        }
    }

    /// Where a task goes once the tier it is pending on has finished with `outcome`.
    ///
    /// Retries inside a tier have already happened by the time this is called.
    fn after(self, tier: Tier, outcome: std::result::Result<String, FetchError>) -> Self {
        let error = match outcome {
            Ok(body) => return Self::Done { tier, body },
            Err(error) => error,
        };
        match self {
            Self::PendingDirect if error.class == ErrorClass::Fatal => {
                Self::Exhausted { tier, error }
            }
            Self::PendingDirect => Self::PendingBrowser,
            Self::PendingBrowser => Self::PendingSerial,
            Self::PendingSerial => Self::Exhausted { tier, error },
            terminal => terminal,
        }
    }
}

/// How a tier run ended.
enum TierRun {
    Finished(std::result::Result<String, FetchError>),
    Cancelled,
}

// ---------------------------------------------------------------------------
// TieredFetcher
// ---------------------------------------------------------------------------

/// The three transports a [`TieredFetcher`] escalates through.
pub struct Transports {
    pub direct: Arc<dyn FetchTransport>,
    /// `None` disables the browser tier.
    pub browser: Option<Arc<dyn FetchTransport>>,
    pub serial: Arc<dyn FetchTransport>,
}

impl Transports {
    /// Real transports built from configuration.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let browser: Option<Arc<dyn FetchTransport>> = if config.enable_browser {
            Some(Arc::new(BrowserTransport::new(config)))
        } else {
            None
        };
        Ok(Self {
            direct: Arc::new(DirectTransport::new(config)?),
            browser,
            serial: Arc::new(SerialTransport::new(config)?),
        })
    }
}

/// Retrieves pages through the direct → browser → serial escalation chain.
pub struct TieredFetcher {
    config: FetchConfig,
    transports: Transports,
    slots: Arc<Semaphore>,
    browser_permit: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TieredFetcher {
    /// Create a fetcher with real HTTP and browser transports.
    pub fn new(config: FetchConfig, cancel: CancellationToken) -> Result<Self> {
        let transports = Transports::from_config(&config)?;
        Ok(Self::with_transports(config, transports, cancel))
    }

    pub fn with_transports(
        config: FetchConfig,
        transports: Transports,
        cancel: CancellationToken,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            transports,
            slots,
            browser_permit: Arc::new(Semaphore::new(1)),
            cancel,
        }
    }

    pub fn browser_enabled(&self) -> bool {
        self.transports.browser.is_some()
    }

    /// Fetch one address, starting at the direct tier.
    pub async fn fetch(&self, address: &str) -> FetchResult {
        match Url::parse(address) {
            Ok(url) => self.fetch_task(FetchTask::new(url)).await,
            Err(e) => {
                warn!(%address, error = %e, "malformed address");
                FetchResult::Failure {
                    class: ErrorClass::Fatal,
                    tier: Tier::Direct,
                    attempts: 0,
                    message: format!("malformed URL {address:?}: {e}"),
                }
            }
        }
    }

    /// Fetch many addresses concurrently. Results come back in input order.
    pub async fn fetch_all(&self, addresses: &[String]) -> Vec<FetchResult> {
        join_all(addresses.iter().map(|address| self.fetch(address))).await
    }

    /// Drive one task through the tier state machine to a terminal result.
    #[instrument(skip_all, fields(url = %task.url))]
    pub async fn fetch_task(&self, mut task: FetchTask) -> FetchResult {
        let mut state = FetchState::start(task.tier_hint);

        loop {
            let tier = match state {
                FetchState::Done { tier, body } => {
                    info!(%tier, attempts = task.attempts, bytes = body.len(), "fetched");
                    return FetchResult::Success { body, tier };
                }
                FetchState::Exhausted { tier, error } => {
                    warn!(%tier, attempts = task.attempts, error = %error, "all tiers exhausted");
                    return FetchResult::Failure {
                        class: error.class,
                        tier,
                        attempts: task.attempts,
                        message: error.message,
                    };
                }
                FetchState::PendingDirect => Tier::Direct,
                FetchState::PendingBrowser if !self.browser_enabled() => {
                    debug!("browser tier disabled, escalating to serial");
                    state = FetchState::PendingSerial;
                    continue;
                }
                FetchState::PendingBrowser => Tier::Browser,
                FetchState::PendingSerial => Tier::Serial,
            };

            let outcome = match self.run_tier(tier, &mut task).await {
                TierRun::Finished(outcome) => outcome,
                TierRun::Cancelled => {
                    info!(attempts = task.attempts, "fetch cancelled");
                    return FetchResult::Cancelled;
                }
            };

            state = state.after(tier, outcome);
            debug!(%tier, next = ?StateName(&state), "tier finished");
        }
    }

    /// Run every attempt one tier allows for `task`.
    async fn run_tier(&self, tier: Tier, task: &mut FetchTask) -> TierRun {
        match tier {
            Tier::Direct => {
                self.run_pooled(
                    self.transports.direct.as_ref(),
                    self.config.direct_retries,
                    task,
                )
                .await
            }
            Tier::Serial => {
                self.run_pooled(
                    self.transports.serial.as_ref(),
                    self.config.serial_retries,
                    task,
                )
                .await
            }
            Tier::Browser => match self.transports.browser.as_ref() {
                Some(transport) => self.run_browser(transport.as_ref(), task).await,
                None => TierRun::Finished(Err(FetchError::blocked("browser tier disabled"))),
            },
        }
    }

    /// Direct/serial attempts: one pool slot per attempt, transient failures retried with
    /// backoff until `budget` attempts are spent.
    async fn run_pooled(
        &self,
        transport: &dyn FetchTransport,
        budget: u32,
        task: &mut FetchTask,
    ) -> TierRun {
        let tier = transport.tier();
        let mut attempt = 0u32;

        loop {
            let result = {
                let _permit = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return TierRun::Cancelled,
                    permit = self.slots.acquire() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return TierRun::Cancelled,
                    },
                };

                if !self.config.rate_limit.is_zero() {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return TierRun::Cancelled,
                        () = tokio::time::sleep(self.config.rate_limit) => {}
                    }
                }

                attempt += 1;
                task.attempts += 1;
                debug!(%tier, attempt, "attempting fetch");
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return TierRun::Cancelled,
                    result = transport.fetch(&task.url) => result,
                }
            };

            match result {
                Ok(body) => return TierRun::Finished(Ok(body)),
                Err(error) if error.class == ErrorClass::Transient && attempt < budget => {
                    warn!(%tier, attempt, budget, error = %error, "transient failure, retrying");
                    if !self.config.backoff.wait(attempt - 1, &self.cancel).await {
                        return TierRun::Cancelled;
                    }
                }
                Err(error) => {
                    warn!(%tier, attempt, error = %error, "tier failed");
                    return TierRun::Finished(Err(error));
                }
            }
        }
    }

    /// A single browser attempt under the process-wide browser permit.
    async fn run_browser(&self, transport: &dyn FetchTransport, task: &mut FetchTask) -> TierRun {
        let _permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return TierRun::Cancelled,
            permit = self.browser_permit.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return TierRun::Cancelled,
            },
        };

        task.attempts += 1;
        debug!(tier = %Tier::Browser, "attempting browser render");
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return TierRun::Cancelled,
            result = transport.fetch(&task.url) => result,
        };
        if let Err(error) = &result {
            warn!(tier = %Tier::Browser, error = %error, "browser render failed");
        }
        TierRun::Finished(result)
    }
}

/// Logs a state without its page body.
struct StateName<'a>(&'a FetchState);

impl std::fmt::Debug for StateName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self.0 {
            FetchState::PendingDirect => "PendingDirect",
            FetchState::PendingBrowser => "PendingBrowser",
            FetchState::PendingSerial => "PendingSerial",
            FetchState::Exhausted { .. } => "Exhausted",
            FetchState::Done { .. } => "Done",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use confscout_shared::{AppConfig, Backoff};

    use super::*;

    type Responder = Box<dyn Fn(u32) -> std::result::Result<String, FetchError> + Send + Sync>;

    /// In-flight counter; several transports may share one.
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    /// Scripted transport that records calls and peak concurrency.
    struct MockTransport {
        tier: Tier,
        respond: Responder,
        delay: Duration,
        calls: AtomicU32,
        gauge: Arc<Gauge>,
        log: Arc<Mutex<Vec<Tier>>>,
    }

    impl MockTransport {
        fn new(
            tier: Tier,
            log: &Arc<Mutex<Vec<Tier>>>,
            respond: impl Fn(u32) -> std::result::Result<String, FetchError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Self::slow(tier, log, Duration::ZERO, respond)
        }

        fn slow(
            tier: Tier,
            log: &Arc<Mutex<Vec<Tier>>>,
            delay: Duration,
            respond: impl Fn(u32) -> std::result::Result<String, FetchError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Self::gauged(tier, log, delay, Arc::default(), respond)
        }

        fn gauged(
            tier: Tier,
            log: &Arc<Mutex<Vec<Tier>>>,
            delay: Duration,
            gauge: Arc<Gauge>,
            respond: impl Fn(u32) -> std::result::Result<String, FetchError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                tier,
                respond: Box::new(respond),
                delay,
                calls: AtomicU32::new(0),
                gauge,
                log: Arc::clone(log),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.gauge.peak()
        }
    }

    #[async_trait]
    impl FetchTransport for MockTransport {
        fn tier(&self) -> Tier {
            self.tier
        }

        async fn fetch(&self, _url: &Url) -> std::result::Result<String, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.tier);
            self.gauge.enter();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.gauge.leave();
            (self.respond)(call)
        }
    }

    fn test_config(max_concurrent: usize) -> FetchConfig {
        let mut config = FetchConfig::from(&AppConfig::default());
        config.max_concurrent = max_concurrent;
        config.rate_limit = Duration::ZERO;
        config.backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4));
        config
    }

    fn fetcher(
        direct: &Arc<MockTransport>,
        browser: Option<&Arc<MockTransport>>,
        serial: &Arc<MockTransport>,
        max_concurrent: usize,
    ) -> TieredFetcher {
        let browser: Option<Arc<dyn FetchTransport>> =
            browser.map(|b| Arc::clone(b) as Arc<dyn FetchTransport>);
        TieredFetcher::with_transports(
            test_config(max_concurrent),
            Transports {
                direct: Arc::clone(direct) as Arc<dyn FetchTransport>,
                browser,
                serial: Arc::clone(serial) as Arc<dyn FetchTransport>,
            },
            CancellationToken::new(),
        )
    }

    fn ok(
        body: &'static str,
    ) -> impl Fn(u32) -> std::result::Result<String, FetchError> + Send + Sync + 'static {
        move |_| Ok(body.to_string())
    }

    const URL: &str = "https://conferences.example.org/announcement/1";

    #[test]
    fn state_transitions() {
        let blocked = || Err(FetchError::blocked("429"));
        let transient = || Err(FetchError::transient("timeout"));
        let fatal = || Err(FetchError::fatal("404"));

        assert_eq!(
            FetchState::PendingDirect.after(Tier::Direct, blocked()),
            FetchState::PendingBrowser
        );
        assert_eq!(
            FetchState::PendingDirect.after(Tier::Direct, transient()),
            FetchState::PendingBrowser
        );
        assert!(matches!(
            FetchState::PendingDirect.after(Tier::Direct, fatal()),
            FetchState::Exhausted { tier: Tier::Direct, .. }
        ));
        assert_eq!(
            FetchState::PendingBrowser.after(Tier::Browser, fatal()),
            FetchState::PendingSerial
        );
        assert!(matches!(
            FetchState::PendingSerial.after(Tier::Serial, blocked()),
            FetchState::Exhausted { tier: Tier::Serial, .. }
        ));
        assert_eq!(
            FetchState::PendingSerial.after(Tier::Serial, Ok("x".into())),
            FetchState::Done {
                tier: Tier::Serial,
                body: "x".into()
            }
        );
    }

    #[tokio::test]
    async fn single_blocked_escalates_after_one_direct_attempt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::blocked("429")));
        let browser = MockTransport::new(Tier::Browser, &log, ok("rendered"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let result = fetcher(&direct, Some(&browser), &serial, 3).fetch(URL).await;

        assert_eq!(
            result,
            FetchResult::Success {
                body: "rendered".into(),
                tier: Tier::Browser
            }
        );
        assert_eq!(direct.calls(), 1);
        assert_eq!(serial.calls(), 0);
        assert_eq!(*log.lock().unwrap(), vec![Tier::Direct, Tier::Browser]);
    }

    #[tokio::test]
    async fn disabled_browser_escalates_straight_to_serial() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::blocked("403")));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial body"));

        let fetcher = fetcher(&direct, None, &serial, 3);
        assert!(!fetcher.browser_enabled());
        let result = fetcher.fetch(URL).await;

        assert_eq!(result.body(), Some("serial body"));
        assert_eq!(*log.lock().unwrap(), vec![Tier::Direct, Tier::Serial]);
    }

    #[tokio::test]
    async fn transient_failures_retry_within_direct_tier() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |call| {
            if call < 2 {
                Err(FetchError::transient("reset"))
            } else {
                Ok("third time".into())
            }
        });
        let browser = MockTransport::new(Tier::Browser, &log, ok("rendered"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let result = fetcher(&direct, Some(&browser), &serial, 3).fetch(URL).await;

        assert_eq!(
            result,
            FetchResult::Success {
                body: "third time".into(),
                tier: Tier::Direct
            }
        );
        assert_eq!(direct.calls(), 3);
        assert_eq!(browser.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_direct_budget_escalates_and_never_returns() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::transient("503")));
        let browser =
            MockTransport::new(Tier::Browser, &log, |_| Err(FetchError::transient("crash")));
        let serial = MockTransport::new(Tier::Serial, &log, |call| {
            if call == 0 {
                Err(FetchError::transient("reset"))
            } else {
                Ok("finally".into())
            }
        });

        let result = fetcher(&direct, Some(&browser), &serial, 3).fetch(URL).await;

        assert_eq!(result.body(), Some("finally"));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Tier::Direct,
                Tier::Direct,
                Tier::Direct,
                Tier::Browser,
                Tier::Serial,
                Tier::Serial
            ]
        );
    }

    #[tokio::test]
    async fn fatal_error_abandons_without_escalation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::fatal("404")));
        let browser = MockTransport::new(Tier::Browser, &log, ok("rendered"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let result = fetcher(&direct, Some(&browser), &serial, 3).fetch(URL).await;

        assert!(matches!(
            result,
            FetchResult::Failure {
                class: ErrorClass::Fatal,
                tier: Tier::Direct,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(browser.calls() + serial.calls(), 0);
    }

    #[tokio::test]
    async fn all_tiers_failing_reports_last_classification() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::transient("503")));
        let browser =
            MockTransport::new(Tier::Browser, &log, |_| Err(FetchError::blocked("challenge")));
        let serial = MockTransport::new(Tier::Serial, &log, |_| Err(FetchError::transient("503")));

        let result = fetcher(&direct, Some(&browser), &serial, 3).fetch(URL).await;

        assert_eq!(
            result,
            FetchResult::Failure {
                class: ErrorClass::Transient,
                tier: Tier::Serial,
                attempts: 6,
                message: "503".into()
            }
        );
        assert_eq!(serial.calls(), 2);
    }

    #[tokio::test]
    async fn blocked_in_serial_tier_is_not_retried() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::blocked("403")));
        let serial = MockTransport::new(Tier::Serial, &log, |_| Err(FetchError::blocked("403")));

        let result = fetcher(&direct, None, &serial, 3).fetch(URL).await;

        assert!(matches!(
            result,
            FetchResult::Failure {
                class: ErrorClass::Blocked,
                ..
            }
        ));
        assert_eq!(serial.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_address_fails_without_attempts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, ok("never"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("never"));

        let result = fetcher(&direct, None, &serial, 3).fetch("not a url").await;

        assert!(matches!(
            result,
            FetchResult::Failure {
                class: ErrorClass::Fatal,
                attempts: 0,
                ..
            }
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tier_hint_selects_starting_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, ok("direct"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let task = FetchTask::new(Url::parse(URL).unwrap()).starting_at(Tier::Serial);
        let result = fetcher(&direct, None, &serial, 3).fetch_task(task).await;

        assert_eq!(result.body(), Some("serial"));
        assert_eq!(direct.calls(), 0);
    }

    #[tokio::test]
    async fn direct_concurrency_is_bounded() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct =
            MockTransport::slow(Tier::Direct, &log, Duration::from_millis(20), ok("page"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let addresses: Vec<String> = (0..12).map(|i| format!("{URL}?n={i}")).collect();
        let results = fetcher(&direct, None, &serial, 3)
            .fetch_all(&addresses)
            .await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.body() == Some("page")));
        assert!(direct.peak() <= 3, "peak was {}", direct.peak());
        assert!(direct.peak() >= 2);
    }

    #[tokio::test]
    async fn direct_and_serial_share_the_slot_limit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let gauge = Arc::new(Gauge::default());
        let delay = Duration::from_millis(20);
        let direct = MockTransport::gauged(Tier::Direct, &log, delay, Arc::clone(&gauge), |call| {
            if call % 2 == 0 {
                Err(FetchError::blocked("429"))
            } else {
                Ok("direct".into())
            }
        });
        let serial =
            MockTransport::gauged(Tier::Serial, &log, delay, Arc::clone(&gauge), ok("serial"));

        let addresses: Vec<String> = (0..12).map(|i| format!("{URL}?n={i}")).collect();
        let results = fetcher(&direct, None, &serial, 3)
            .fetch_all(&addresses)
            .await;

        assert!(results.iter().all(|r| r.body().is_some()));
        assert!(serial.calls() >= 1);
        assert!(gauge.peak() <= 3, "peak was {}", gauge.peak());
    }

    #[tokio::test]
    async fn browser_renders_one_at_a_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |_| Err(FetchError::blocked("429")));
        let browser =
            MockTransport::slow(Tier::Browser, &log, Duration::from_millis(10), ok("rendered"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));

        let addresses: Vec<String> = (0..5).map(|i| format!("{URL}?n={i}")).collect();
        let results = fetcher(&direct, Some(&browser), &serial, 3)
            .fetch_all(&addresses)
            .await;

        assert!(results.iter().all(|r| r.body() == Some("rendered")));
        assert_eq!(browser.calls(), 5);
        assert_eq!(browser.peak(), 1);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct = MockTransport::new(Tier::Direct, &log, |call| Ok(format!("body-{call}")));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));
        let addresses = vec![URL.to_string(), "bad address".to_string(), URL.to_string()];

        let results = fetcher(&direct, None, &serial, 1).fetch_all(&addresses).await;

        assert!(results[0].body().is_some());
        assert!(matches!(results[1], FetchResult::Failure { attempts: 0, .. }));
        assert!(results[2].body().is_some());
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let direct =
            MockTransport::slow(Tier::Direct, &log, Duration::from_secs(30), ok("too late"));
        let serial = MockTransport::new(Tier::Serial, &log, ok("serial"));
        let cancel = CancellationToken::new();
        let fetcher = TieredFetcher::with_transports(
            test_config(3),
            Transports {
                direct: direct.clone() as Arc<dyn FetchTransport>,
                browser: None,
                serial: serial.clone() as Arc<dyn FetchTransport>,
            },
            cancel.clone(),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = fetcher.fetch(URL).await;

        assert!(result.is_cancelled());
        assert_eq!(serial.calls(), 0);
        assert!(fetcher.fetch(URL).await.is_cancelled());
    }
}
