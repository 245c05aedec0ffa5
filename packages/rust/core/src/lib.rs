//! Core pipeline orchestration and domain logic for ConfScout.
//!
//! This crate ties together tiered fetching, record parsing, deduplication, and
//! enrichment into the end-to-end `run` workflow, plus the dataset export.

pub mod dedup;
pub mod enrichment;
pub mod export;
pub mod pipeline;

pub use dedup::filter_new;
pub use enrichment::{
    ChatCompletionsService, Enrichment, EnrichmentClient, EnrichmentSource, EnrichmentStats,
    ExtractionRequest, ExtractionService, cache_key, parse_extraction,
};
pub use export::{ExportReport, export};
pub use pipeline::{
    Pipeline, PipelineParts, ProgressReporter, RunOptions, RunSummary, SilentProgress,
};
