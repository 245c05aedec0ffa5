//! Tiered page retrieval for hostile, rate-limiting sites.
//!
//! This crate provides:
//! - [`transport`]: the single-attempt [`FetchTransport`] contract and failure classification
//! - [`http`]: pooled direct (tier A) and fresh-session serial (tier C) HTTP transports
//! - [`browser`]: headless Chromium transport (tier B)
//! - [`engine`]: the [`TieredFetcher`] state machine that retries and escalates between tiers

pub mod browser;
pub mod engine;
pub mod http;
pub mod transport;

pub use browser::BrowserTransport;
pub use engine::{FetchResult, FetchTask, TieredFetcher, Transports};
pub use http::{DirectTransport, SerialTransport};
pub use transport::{ErrorClass, FetchError, FetchTransport, Tier, is_challenge_page};
