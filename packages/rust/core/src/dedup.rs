//! Title-based deduplication against the stored dataset.

use std::collections::HashSet;

use tracing::debug;

use confscout_shared::ConferenceRecord;
use confscout_storage::Dataset;

/// Candidates whose normalized title is neither stored nor seen earlier in the batch.
///
/// Candidate order is preserved.
pub fn filter_new(candidates: Vec<ConferenceRecord>, existing: &Dataset) -> Vec<ConferenceRecord> {
    let total = candidates.len();
    let mut seen = HashSet::new();
    let fresh: Vec<ConferenceRecord> = candidates
        .into_iter()
        .filter(|record| {
            let key = record.normalized_title();
            !existing.contains_title(&key) && seen.insert(key)
        })
        .collect();

    debug!(candidates = total, fresh = fresh.len(), "deduplicated listing");
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(records: &[ConferenceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn drops_stored_titles_ignoring_case_and_punctuation() {
        let existing = Dataset::from_records([ConferenceRecord::new("3rd Finance Summit!")]);
        let candidates = vec![
            ConferenceRecord::new("3rd finance summit"),
            ConferenceRecord::new("Beta Workshop"),
        ];

        let fresh = filter_new(candidates, &existing);
        assert_eq!(titles(&fresh), ["Beta Workshop"]);
    }

    #[test]
    fn keeps_first_of_in_batch_duplicates_in_order() {
        let candidates = vec![
            ConferenceRecord::new("Gamma Forum"),
            ConferenceRecord::new("Alpha Conf"),
            ConferenceRecord::new("GAMMA  forum"),
            ConferenceRecord::new("Delta Days"),
        ];

        let fresh = filter_new(candidates, &Dataset::new());
        assert_eq!(titles(&fresh), ["Gamma Forum", "Alpha Conf", "Delta Days"]);
    }

    #[test]
    fn idempotent() {
        let existing = Dataset::from_records([ConferenceRecord::new("Alpha Conf")]);
        let candidates = vec![
            ConferenceRecord::new("Alpha Conf"),
            ConferenceRecord::new("Beta Conf"),
        ];

        let once = filter_new(candidates, &existing);
        let twice = filter_new(once.clone(), &existing);
        assert_eq!(once, twice);
    }
}
