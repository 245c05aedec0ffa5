//! Default parser for announcement listing and detail pages.
//!
//! Listing pages are `<li>` blocks shaped like:
//!
//! ```text
//! <a href="/announcement/123">Title</a> Conference Dates: 1 May 2025 - 2 May 2025
//! Location: Vienna, Austria Posted: 12 Mar 2025
//! ```
//!
//! Detail pages group their text into `div.form-group` blocks headed by an `<h3>`.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use confscout_shared::ConferenceRecord;

use crate::RecordParser;

/// Shortest listing entry worth looking at.
const MIN_ENTRY_CHARS: usize = 50;

/// Titles this short are navigation crumbs, not announcements.
const MIN_TITLE_CHARS: usize = 6;

/// Listing text kept as a fallback description.
const LISTING_DESCRIPTION_CHARS: usize = 500;

/// Body text kept when a detail page has no structured sections.
const FALLBACK_DESCRIPTION_CHARS: usize = 3000;

/// Detail sections shorter than this are labels, not content.
const MIN_SECTION_CHARS: usize = 21;

/// `<h3>` keywords that mark a detail section as worth keeping.
const SECTION_KEYWORDS: [&str; 11] = [
    "description",
    "overview",
    "call for papers",
    "topics",
    "scope",
    "about",
    "details",
    "submission",
    "conference",
    "additional",
    "location",
];

/// Elements whose text never belongs in a description.
const CHROME_TAGS: [&str; 5] = ["nav", "header", "footer", "script", "style"];

static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static CONTENT_AREAS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", "div.main-content", "div#content", "div.content"]
        .into_iter()
        .map(selector)
        .collect()
});
static FORM_GROUP: LazyLock<Selector> = LazyLock::new(|| selector("div.form-group"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h3"));
static SECTION_BODY: LazyLock<Selector> = LazyLock::new(|| selector("div"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));
static MAIN_OR_BODY: LazyLock<Selector> = LazyLock::new(|| selector("main, body"));

static DATES_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?i)Conference Dates?:\s*(.+?)\s*(?:Location:|Posted:|$)")
});
static DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(\d{1,2}\s+[A-Za-z]+\s+\d{4}\s*[-–]\s*\d{1,2}\s+[A-Za-z]+\s+\d{4})")
});
static SINGLE_DATE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(\d{1,2}\s+[A-Za-z]+\s+\d{4})"));
static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?i)Location:\s*(.+?)\s*(?:Posted:|$)"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {css:?}: {e}"))
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

// ---------------------------------------------------------------------------
// AnnouncementParser
// ---------------------------------------------------------------------------

/// Heuristic parser for professional-announcement listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnouncementParser;

impl RecordParser for AnnouncementParser {
    fn parse_listing(&self, html: &str, base: &Url) -> Vec<ConferenceRecord> {
        let doc = Html::parse_document(html);
        let records: Vec<ConferenceRecord> = doc
            .select(&LIST_ITEM)
            .filter(|li| li.select(&LIST_ITEM).next().is_none())
            .filter_map(|li| parse_entry(li, base))
            .collect();
        debug!(count = records.len(), "parsed listing");
        records
    }

    fn parse_detail(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);

        for area_selector in CONTENT_AREAS.iter() {
            let parts: Vec<String> = doc
                .select(area_selector)
                .flat_map(|area| area.select(&FORM_GROUP).collect::<Vec<_>>())
                .filter_map(section_text)
                .collect();
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }

        let root = doc.select(&MAIN_OR_BODY).next()?;
        let text = visible_text(root);
        (text.chars().count() > 100).then(|| truncate_chars(&text, FALLBACK_DESCRIPTION_CHARS))
    }
}

/// One listing `<li>` to a record, or `None` when it is not an announcement.
fn parse_entry(li: ElementRef<'_>, base: &Url) -> Option<ConferenceRecord> {
    let text = collapse(li.text());
    let anchor = li.select(&ANCHOR).next()?;

    if text.chars().count() <= MIN_ENTRY_CHARS
        || !text.contains("Conference Date")
        || !(text.contains("Location:") || text.contains("Posted:"))
    {
        return None;
    }

    let title = collapse(anchor.text());
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }

    let mut record = ConferenceRecord::new(title);
    record.link = anchor
        .value()
        .attr("href")
        .and_then(|href| base.join(href.trim()).ok())
        .map(String::from)
        .unwrap_or_default();
    record.conference_dates = extract_dates(&text).unwrap_or_default();
    record.location = extract_location(&text).unwrap_or_default();
    record.description = truncate_chars(&text, LISTING_DESCRIPTION_CHARS);
    Some(record)
}

fn extract_dates(text: &str) -> Option<String> {
    [&*DATES_LABELLED, &*DATE_RANGE, &*SINGLE_DATE]
        .into_iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|dates| !dates.is_empty())
}

fn extract_location(text: &str) -> Option<String> {
    LOCATION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|location| location.chars().count() > 2)
}

/// Text of a detail `div.form-group` whose heading marks it as relevant.
fn section_text(group: ElementRef<'_>) -> Option<String> {
    let heading = collapse(group.select(&HEADING).next()?.text()).to_lowercase();
    if !SECTION_KEYWORDS.iter().any(|k| heading.contains(k)) {
        return None;
    }
    let body = group
        .select(&SECTION_BODY)
        .next()
        .or_else(|| group.select(&PARAGRAPH).next())?;
    let text = collapse(body.text());
    (text.chars().count() >= MIN_SECTION_CHARS).then_some(text)
}

/// All text under `root` except page chrome.
fn visible_text(root: ElementRef<'_>) -> String {
    let pieces = root.descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let in_chrome = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| CHROME_TAGS.contains(&el.name()))
        });
        (!in_chrome).then_some(&**text)
    });
    collapse(pieces)
}

/// Join text fragments, collapsing all whitespace runs to single spaces.
fn collapse<'a>(fragments: impl Iterator<Item = &'a str>) -> String {
    fragments
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use confscout_shared::FieldValue;

    use super::*;

    const LISTING: &str = r#"<html><body>
        <ul class="nav"><li><a href="/home">Home</a></li></ul>
        <ul class="announcements">
          <li>
            <a href="/announcement/101">3rd Finance Summit!</a>
            <p>Conference Dates: 12 May 2025 - 14 May 2025</p>
            <p>Location: Vienna, Austria</p>
            <p>Posted: 02 Mar 2025</p>
          </li>
          <li>
            <a href="https://other.example.org/cfp/law">Law &amp; Economics Workshop</a>
            <span>Conference Date: 3 June 2025</span>
            <span>Location: Singapore</span>
          </li>
          <li>
            <a href="/announcement/103">Short</a>
            Conference Dates: 1 July 2025 Location: Paris, France Posted: 1 Jan 2025
          </li>
          <li><a href="/about">About this page: announcements are listed below for members</a></li>
        </ul>
    </body></html>"#;

    fn base() -> Url {
        Url::parse("https://conferences.example.org/listing?net=203").unwrap()
    }

    #[test]
    fn listing_yields_only_announcements() {
        let records = AnnouncementParser.parse_listing(LISTING, &base());
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["3rd Finance Summit!", "Law & Economics Workshop"]
        );
    }

    #[test]
    fn listing_fields_are_extracted() {
        let records = AnnouncementParser.parse_listing(LISTING, &base());
        let summit = &records[0];
        assert_eq!(
            summit.link,
            "https://conferences.example.org/announcement/101"
        );
        assert_eq!(summit.conference_dates, "12 May 2025 - 14 May 2025");
        assert_eq!(summit.location, "Vienna, Austria");
        assert!(summit.description.contains("Posted: 02 Mar 2025"));
        assert_eq!(summit.continent, FieldValue::Unknown);

        let workshop = &records[1];
        assert_eq!(workshop.link, "https://other.example.org/cfp/law");
        assert_eq!(workshop.conference_dates, "3 June 2025");
        assert_eq!(workshop.location, "Singapore");
    }

    #[test]
    fn date_patterns_fall_back_to_bare_dates() {
        assert_eq!(
            extract_dates("Workshop held 4 April 2025 - 5 April 2025 in Rome"),
            Some("4 April 2025 - 5 April 2025".into())
        );
        assert_eq!(
            extract_dates("Meeting on 9 October 2025"),
            Some("9 October 2025".into())
        );
        assert_eq!(extract_dates("no dates here"), None);
    }

    #[test]
    fn detail_prefers_structured_sections() {
        let html = r#"<html><body><article>
            <div class="form-group"><h3>Description</h3>
              <div>We invite submissions on corporate finance and governance.</div></div>
            <div class="form-group"><h3>Contact</h3>
              <div>someone@example.org, please write for anything at all</div></div>
            <div class="form-group"><h3>Additional Information</h3>
              <p>Submission deadline is 1 March 2025; no submission fee.</p></div>
        </article></body></html>"#;

        let description = AnnouncementParser.parse_detail(html).expect("description");
        assert!(description.starts_with("We invite submissions"));
        assert!(description.contains("no submission fee"));
        assert!(!description.contains("someone@example.org"));
    }

    #[test]
    fn detail_falls_back_to_visible_body_text() {
        let body = "This workshop gathers researchers in empirical law and economics. ".repeat(3);
        let html = format!(
            "<html><body><nav>Menu Login Register</nav><main><p>{body}</p>\
             <script>var tracking = 1;</script></main><footer>Copyright</footer></body></html>"
        );

        let description = AnnouncementParser.parse_detail(&html).expect("description");
        assert!(description.starts_with("This workshop gathers"));
        assert!(!description.contains("Menu"));
        assert!(!description.contains("tracking"));
        assert!(!description.contains("Copyright"));
    }

    #[test]
    fn detail_without_content_is_none() {
        assert_eq!(
            AnnouncementParser.parse_detail("<html><body><p>Tiny</p></body></html>"),
            None
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("Zürich", 2), "Zü");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
