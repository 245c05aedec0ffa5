//! The append-only CSV dataset of conference records.
//!
//! One row per record, fixed column order. Rows are only ever appended; a title whose
//! normalized form is already present is never written twice.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use confscout_shared::{
    ConfScoutError, ConferenceRecord, FieldValue, NOT_SPECIFIED, Result, normalize_title,
};

/// On-disk row shape. Column order follows field order.
#[derive(Debug, Serialize, Deserialize)]
struct DatasetRow {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Conference Dates")]
    conference_dates: String,
    #[serde(rename = "Location")]
    location: String,
    #[serde(rename = "Link")]
    link: String,
    #[serde(rename = "Submission Deadline")]
    submission_deadline: FieldValue,
    #[serde(rename = "Submission Fee")]
    submission_fee: FieldValue,
    #[serde(rename = "Registration Fee")]
    registration_fee: FieldValue,
    #[serde(rename = "Continent")]
    continent: FieldValue,
}

fn or_not_specified(value: &str) -> String {
    if value.trim().is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        value.to_string()
    }
}

fn from_not_specified(value: String) -> String {
    if value == NOT_SPECIFIED {
        String::new()
    } else {
        value
    }
}

impl From<&ConferenceRecord> for DatasetRow {
    fn from(record: &ConferenceRecord) -> Self {
        Self {
            title: record.title.clone(),
            conference_dates: or_not_specified(&record.conference_dates),
            location: or_not_specified(&record.location),
            link: or_not_specified(&record.link),
            submission_deadline: record.submission_deadline.clone(),
            submission_fee: record.submission_fee.clone(),
            registration_fee: record.registration_fee.clone(),
            continent: record.continent.clone(),
        }
    }
}

impl From<DatasetRow> for ConferenceRecord {
    fn from(row: DatasetRow) -> Self {
        Self {
            title: row.title,
            conference_dates: from_not_specified(row.conference_dates),
            location: from_not_specified(row.location),
            description: String::new(),
            link: from_not_specified(row.link),
            submission_deadline: row.submission_deadline,
            submission_fee: row.submission_fee,
            registration_fee: row.registration_fee,
            continent: row.continent,
        }
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Records keyed by normalized title, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<ConferenceRecord>,
    titles: HashSet<String>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records, keeping the first of any normalized-title duplicates.
    pub fn from_records(records: impl IntoIterator<Item = ConferenceRecord>) -> Self {
        let mut dataset = Self::new();
        for record in records {
            dataset.insert(record);
        }
        dataset
    }

    /// Add a record unless its normalized title is already present.
    pub fn insert(&mut self, record: ConferenceRecord) -> bool {
        if self.titles.insert(record.normalized_title()) {
            self.records.push(record);
            true
        } else {
            false
        }
    }

    pub fn contains_title(&self, title: &str) -> bool {
        self.titles.contains(&normalize_title(title))
    }

    pub fn records(&self) -> &[ConferenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DatasetFile
// ---------------------------------------------------------------------------

/// The dataset's CSV file on disk.
#[derive(Debug, Clone)]
pub struct DatasetFile {
    path: PathBuf,
}

impl DatasetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row. A missing file is an empty dataset; unreadable rows are skipped.
    pub fn load_existing(&self) -> Result<Dataset> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "dataset file not found, starting empty");
            return Ok(Dataset::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        let mut dataset = Dataset::new();
        for (line, row) in reader.deserialize::<DatasetRow>().enumerate() {
            match row {
                Ok(row) => {
                    if !dataset.insert(row.into()) {
                        debug!(line = line + 2, "duplicate title in dataset file");
                    }
                }
                Err(e) if e.is_io_error() => return Err(self.csv_error(e)),
                Err(e) => warn!(line = line + 2, error = %e, "skipping unreadable dataset row"),
            }
        }

        info!(path = %self.path.display(), records = dataset.len(), "loaded dataset");
        Ok(dataset)
    }

    /// Append `records`, skipping any whose normalized title is already stored.
    ///
    /// All rows go out in one write followed by an fsync. Returns how many were appended.
    pub fn append(&self, records: &[ConferenceRecord]) -> Result<usize> {
        let mut existing = self.load_existing()?;
        let fresh: Vec<&ConferenceRecord> = records
            .iter()
            .filter(|record| existing.insert((*record).clone()))
            .collect();
        if fresh.is_empty() {
            debug!("nothing new to append");
            return Ok(0);
        }

        let needs_header = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let buffer = encode_rows(fresh.iter().copied(), needs_header)
            .map_err(|e| self.csv_error(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfScoutError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ConfScoutError::io(&self.path, e))?;
        file.write_all(&buffer)
            .and_then(|()| file.sync_all())
            .map_err(|e| ConfScoutError::io(&self.path, e))?;

        info!(path = %self.path.display(), appended = fresh.len(), "appended records");
        Ok(fresh.len())
    }

    /// Replace the whole file with `records`. Used for derived snapshots, never the dataset.
    pub fn write_snapshot<'a>(
        &self,
        records: impl IntoIterator<Item = &'a ConferenceRecord>,
    ) -> Result<usize> {
        let records: Vec<&ConferenceRecord> = records.into_iter().collect();
        let buffer = encode_rows(records.iter().copied(), true).map_err(|e| self.csv_error(e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfScoutError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        std::fs::write(&tmp, &buffer).map_err(|e| ConfScoutError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ConfScoutError::io(&self.path, e))?;
        Ok(records.len())
    }

    fn csv_error(&self, e: csv::Error) -> ConfScoutError {
        ConfScoutError::dataset(&self.path, e.to_string())
    }
}

fn encode_rows<'a>(
    records: impl Iterator<Item = &'a ConferenceRecord>,
    with_header: bool,
) -> std::result::Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(DatasetRow::from(record))?;
    }
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use confscout_shared::{EnrichedFields, NOT_FOUND};
    use uuid::Uuid;

    use super::*;

    fn temp_file() -> DatasetFile {
        DatasetFile::new(
            std::env::temp_dir()
                .join(format!("confscout-dataset-{}", Uuid::now_v7()))
                .join("conferences.csv"),
        )
    }

    fn record(title: &str) -> ConferenceRecord {
        let mut record = ConferenceRecord::new(title);
        record.conference_dates = "1 May 2025".into();
        record.location = "Vienna, Austria".into();
        record.link = "https://conferences.example.org/a/1".into();
        record.apply_enrichment(EnrichedFields {
            continent: FieldValue::Found("Europe".into()),
            ..EnrichedFields::not_found()
        });
        record
    }

    #[test]
    fn missing_file_is_empty() {
        let file = temp_file();
        assert!(file.load_existing().unwrap().is_empty());
    }

    #[test]
    fn append_then_load() {
        let file = temp_file();
        let appended = file.append(&[record("Alpha Conf"), record("Beta Conf")]).unwrap();
        assert_eq!(appended, 2);

        let dataset = file.load_existing().unwrap();
        assert_eq!(dataset.len(), 2);
        let alpha = &dataset.records()[0];
        assert_eq!(alpha.title, "Alpha Conf");
        assert_eq!(alpha.continent, FieldValue::Found("Europe".into()));
        assert_eq!(alpha.submission_fee, FieldValue::NotFound);
        assert!(dataset.contains_title("alpha conf!"));
    }

    #[test]
    fn header_written_once_and_columns_ordered() {
        let file = temp_file();
        file.append(&[record("Alpha Conf")]).unwrap();
        file.append(&[record("Beta Conf")]).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "Title,Conference Dates,Location,Link,Submission Deadline,Submission Fee,\
             Registration Fee,Continent"
        );
        assert!(lines[2].starts_with("Beta Conf,1 May 2025,\"Vienna, Austria\""));
        assert!(lines[2].ends_with(&format!("{NOT_FOUND},Europe")));
    }

    #[test]
    fn append_never_duplicates_normalized_titles() {
        let file = temp_file();
        file.append(&[record("3rd Finance Summit!")]).unwrap();

        let appended = file
            .append(&[
                record("3rd finance summit"),
                record("Gamma Forum"),
                record("GAMMA   forum"),
            ])
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(file.load_existing().unwrap().len(), 2);
    }

    #[test]
    fn blank_parser_fields_are_marked_not_specified() {
        let file = temp_file();
        let mut bare = ConferenceRecord::new("Fetch Failed Workshop");
        bare.apply_enrichment(EnrichedFields::not_found());
        file.append(&[bare]).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("Fetch Failed Workshop,Not specified,Not specified,Not specified"));

        let loaded = file.load_existing().unwrap();
        assert_eq!(loaded.records()[0].location, "");
    }

    #[test]
    fn snapshot_replaces_file() {
        let file = temp_file();
        file.append(&[record("Alpha Conf"), record("Beta Conf")]).unwrap();

        let beta = record("Beta Conf");
        assert_eq!(file.write_snapshot([&beta]).unwrap(), 1);
        let dataset = file.load_existing().unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.records()[0].title, "Beta Conf");
    }
}
