//! Record extraction from announcement pages.
//!
//! The pipeline never looks at HTML itself. It hands listing and detail pages to a
//! [`RecordParser`], which turns them into raw [`ConferenceRecord`]s. Enrichment fields
//! on the returned records are always [`FieldValue::Unknown`](confscout_shared::FieldValue).

mod parser;

use confscout_shared::ConferenceRecord;
use url::Url;

pub use parser::AnnouncementParser;

/// Turns fetched pages into records.
pub trait RecordParser: Send + Sync {
    /// Every announcement on a listing page, in page order.
    ///
    /// Relative links are resolved against `base`.
    fn parse_listing(&self, html: &str, base: &Url) -> Vec<ConferenceRecord>;

    /// The longest useful description on a detail page, if any.
    fn parse_detail(&self, html: &str) -> Option<String>;
}
