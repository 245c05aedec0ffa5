//! Sorted, filtered snapshot of the dataset.
//!
//! The dataset file is only read here; the snapshot goes to a separate path.

use tracing::{info, instrument};

use confscout_shared::{ConferenceRecord, Result};
use confscout_storage::DatasetFile;

/// Markers of placeholder or trial announcements that never belong in an export.
const SAMPLE_MARKERS: [&str; 3] = ["samp", "smp", "trial"];

/// Outcome of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub total: usize,
    pub dropped: usize,
    pub written: usize,
}

/// Whether a record looks like a sample or trial entry.
pub fn is_sample(record: &ConferenceRecord) -> bool {
    [&record.title, &record.location, &record.link]
        .iter()
        .any(|field| {
            let field = field.to_lowercase();
            SAMPLE_MARKERS.iter().any(|marker| field.contains(marker))
        })
}

/// Records kept for export, ordered by title ignoring case.
pub fn prepare(records: &[ConferenceRecord]) -> Vec<&ConferenceRecord> {
    let mut kept: Vec<&ConferenceRecord> = records.iter().filter(|r| !is_sample(r)).collect();
    kept.sort_by_cached_key(|r| r.title.to_lowercase());
    kept
}

/// Write the export of `dataset` to `out`.
#[instrument(skip_all, fields(dataset = %dataset.path().display(), out = %out.path().display()))]
pub fn export(dataset: &DatasetFile, out: &DatasetFile) -> Result<ExportReport> {
    let loaded = dataset.load_existing()?;
    let kept = prepare(loaded.records());
    let written = out.write_snapshot(kept)?;

    let report = ExportReport {
        total: loaded.len(),
        dropped: loaded.len() - written,
        written,
    };
    info!(total = report.total, dropped = report.dropped, written = report.written, "export complete");
    Ok(report)
}
