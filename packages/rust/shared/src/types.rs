//! Core domain types for ConfScout records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rendered form of [`FieldValue::Unknown`].
pub const NOT_SPECIFIED: &str = "Not specified";

/// Rendered form of [`FieldValue::NotFound`].
pub const NOT_FOUND: &str = "Not found";

/// Continents the extraction service may report.
pub const CONTINENTS: [&str; 6] = [
    "Africa",
    "Asia",
    "Australia",
    "Europe",
    "North America",
    "South America",
];

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A record field that distinguishes "never looked" from "looked and found nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldValue {
    /// Nobody has tried to fill this field yet.
    #[default]
    Unknown,
    /// Extraction ran and the source had nothing for this field.
    NotFound,
    Found(String),
}

impl FieldValue {
    /// Wrap extracted text; blank text becomes [`FieldValue::NotFound`].
    pub fn extracted(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        if text.is_empty()
            || text.eq_ignore_ascii_case(NOT_FOUND)
            || text.eq_ignore_ascii_case(NOT_SPECIFIED)
        {
            Self::NotFound
        } else {
            Self::Found(text.to_owned())
        }
    }

}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str(NOT_SPECIFIED),
            Self::NotFound => f.write_str(NOT_FOUND),
            Self::Found(s) => f.write_str(s),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == NOT_SPECIFIED {
            Self::Unknown
        } else if trimmed == NOT_FOUND {
            Self::NotFound
        } else {
            Self::Found(trimmed.to_owned())
        }
    }
}

impl From<FieldValue> for String {
    fn from(value: FieldValue) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// EnrichedFields
// ---------------------------------------------------------------------------

/// Fields filled in by the extraction service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedFields {
    pub submission_deadline: FieldValue,
    pub submission_fee: FieldValue,
    pub registration_fee: FieldValue,
    pub continent: FieldValue,
}

impl EnrichedFields {
    /// Every field marked as looked-for-but-missing.
    pub fn not_found() -> Self {
        Self {
            submission_deadline: FieldValue::NotFound,
            submission_fee: FieldValue::NotFound,
            registration_fee: FieldValue::NotFound,
            continent: FieldValue::NotFound,
        }
    }
}

// ---------------------------------------------------------------------------
// ConferenceRecord
// ---------------------------------------------------------------------------

/// One conference announcement.
///
/// The first five fields come from the record parser, the rest from enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceRecord {
    pub title: String,
    #[serde(default)]
    pub conference_dates: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub submission_deadline: FieldValue,
    #[serde(default)]
    pub submission_fee: FieldValue,
    #[serde(default)]
    pub registration_fee: FieldValue,
    #[serde(default)]
    pub continent: FieldValue,
}

impl ConferenceRecord {
    /// A freshly parsed record with enrichment fields still unknown.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Dedup identity of this record.
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }

    pub fn apply_enrichment(&mut self, fields: EnrichedFields) {
        self.submission_deadline = fields.submission_deadline;
        self.submission_fee = fields.submission_fee;
        self.registration_fee = fields.registration_fee;
        self.continent = fields.continent;
    }
}

/// Lower-case, keep only ASCII letters, digits and whitespace, collapse whitespace runs.
///
/// `"3rd Finance Summit!"` and `"  3rd   finance summit "` both normalize to
/// `"3rd finance summit"`.
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_punctuation_and_spacing() {
        assert_eq!(normalize_title("3rd Finance Summit!"), "3rd finance summit");
        assert_eq!(normalize_title("  3rd   finance\tsummit "), "3rd finance summit");
        assert_eq!(
            normalize_title("Law & Economics: 2025 (Call for Papers)"),
            "law economics 2025 call for papers"
        );
        assert_eq!(normalize_title("!!!"), "");
    }

    #[test]
    fn normalization_drops_non_ascii_letters() {
        assert_eq!(normalize_title("Conférence Économie"), "confrence conomie");
    }

    #[test]
    fn field_value_rendering() {
        assert_eq!(FieldValue::Unknown.to_string(), NOT_SPECIFIED);
        assert_eq!(FieldValue::NotFound.to_string(), NOT_FOUND);
        assert_eq!(FieldValue::Found("USD 100".into()).to_string(), "USD 100");
    }

    #[test]
    fn extracted_blank_is_not_found() {
        assert_eq!(FieldValue::extracted("   "), FieldValue::NotFound);
        assert_eq!(FieldValue::extracted("not found"), FieldValue::NotFound);
        assert_eq!(
            FieldValue::extracted(" May 1, 2025 "),
            FieldValue::Found("May 1, 2025".into())
        );
    }

    #[test]
    fn enriched_fields_json_keeps_sentinels() {
        let fields = EnrichedFields {
            submission_deadline: FieldValue::Found("March 3, 2025".into()),
            ..EnrichedFields::not_found()
        };
        let json = serde_json::to_string(&fields).expect("serialize");
        assert!(json.contains("\"Not found\""));
        let parsed: EnrichedFields = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, fields);
    }

    #[test]
    fn new_record_starts_unknown() {
        let mut record = ConferenceRecord::new("Alpha Conf");
        assert_eq!(record.continent, FieldValue::Unknown);
        assert_eq!(record.submission_deadline, FieldValue::Unknown);

        record.apply_enrichment(EnrichedFields::not_found());
        assert_eq!(record.continent, FieldValue::NotFound);
        assert_eq!(record.normalized_title(), "alpha conf");
    }
}
