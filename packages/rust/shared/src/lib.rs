//! Shared types, error model, and configuration for ConfScout.
//!
//! This crate is the foundation depended on by all other ConfScout crates.
//! It provides:
//! - [`ConfScoutError`], the unified error type
//! - Domain types ([`ConferenceRecord`], [`FieldValue`], [`EnrichedFields`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`EnrichmentSettings`], config loading)
//! - [`Backoff`], the exponential retry delay used by every retrying component

pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use backoff::Backoff;
pub use config::{
    AppConfig, CacheMode, CacheSection, DEFAULT_USER_AGENT, EnrichmentSection,
    EnrichmentSettings, FetchConfig, FetchSection, OutputSection, PipelineSection, ProxySection,
    SourceConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use error::{ConfScoutError, Result};
pub use types::{
    CONTINENTS, ConferenceRecord, EnrichedFields, FieldValue, NOT_FOUND, NOT_SPECIFIED,
    normalize_title,
};
