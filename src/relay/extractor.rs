// Export-document extractor
//
// The memories export is a semi-structured HTML page with a single
// table: one header row, then one row per memory with date, media kind,
// location and an action cell whose inline onclick directive carries
// the short-lived download URL. Extraction is best-effort: malformed
// rows are skipped, never escalated.

use lazy_static::lazy_static;
use regex::Regex;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::models::{MediaKind, WorkItem};

lazy_static! {
    static ref TABLE_RE: Regex = Regex::new(r"(?is)<table[^>]*>(.*?)</table>").unwrap();
    static ref ROW_RE: Regex = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap();
    static ref CELL_RE: Regex = Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap();
    static ref DOWNLOAD_RE: Regex =
        Regex::new(r"downloadMemories\(\s*'([^']+)'\s*(?:,([^)]*))?\)").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
}

/// Date pattern used by the export, minus the optional trailing zone
/// marker.
const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Parse the export document into an ordered work list.
///
/// Returns an empty list (not an error) when no table is found or no
/// row validates; callers render that as "no memories found".
pub fn extract(html: &str) -> Vec<WorkItem> {
    let table = match TABLE_RE.captures(html).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => {
            log::warn!("extractor: no table found in document");
            return Vec::new();
        }
    };

    let mut items = Vec::new();
    for (row_index, row) in ROW_RE.captures_iter(table).enumerate() {
        // First row is the header.
        if row_index == 0 {
            continue;
        }
        let body = match row.get(1) {
            Some(m) => m.as_str(),
            None => continue,
        };
        if let Some(item) = parse_row(body, row_index - 1) {
            items.push(item);
        }
    }

    log::info!("extractor: {} memories extracted", items.len());
    items
}

/// Parse one data row; None when any required field is missing.
fn parse_row(body: &str, ordinal: usize) -> Option<WorkItem> {
    let cells: Vec<&str> = CELL_RE
        .captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if cells.len() < 4 {
        return None;
    }

    let date_text = cell_text(cells[0]);
    let kind_text = cell_text(cells[1]);
    let location_text = cell_text(cells[2]);

    // The action cell is searched raw: the directive lives in an
    // attribute that cell_text would strip.
    let directive = DOWNLOAD_RE.captures(cells[3])?;
    let source_url = unescape_entities(directive.get(1)?.as_str());
    if source_url.is_empty() {
        return None;
    }
    let requires_route_header = directive
        .get(2)
        .map_or(false, |m| m.as_str().to_ascii_lowercase().contains("true"));

    Some(WorkItem {
        taken_at: parse_taken_at(&date_text),
        date_text,
        media_kind: MediaKind::from_label(&kind_text),
        location: (!location_text.is_empty()).then_some(location_text),
        source_url,
        requires_route_header,
        ordinal,
    })
}

/// Visible text of a cell: tags stripped, entities unescaped, trimmed.
fn cell_text(cell: &str) -> String {
    let stripped = TAG_RE.replace_all(cell, " ");
    let unescaped = unescape_entities(&stripped);
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unescape the handful of entities the export actually emits.
/// `&amp;` goes last so double-escaped sequences survive one level.
fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Parse the date cell; None leaves the item undated rather than
/// failing the row.
fn parse_taken_at(text: &str) -> Option<OffsetDateTime> {
    let trimmed = text.trim().trim_end_matches("UTC").trim();
    PrimitiveDateTime::parse(trimmed, DATE_FORMAT)
        .ok()
        .map(|dt| dt.assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export_row(date: &str, kind: &str, location: &str, onclick: &str) -> String {
        format!(
            "<tr><td>{date}</td><td>{kind}</td><td>{location}</td>\
             <td><span class=\"require-js-enabled\">\
             <a href=\"#\" onclick=\"{onclick}\">Download</a></span></td></tr>"
        )
    }

    fn export_document(rows: &[String]) -> String {
        format!(
            "<html><body><table><tr><th>Date</th><th>Media Type</th>\
             <th>Location</th><th>Download</th></tr>{}</table></body></html>",
            rows.join("")
        )
    }

    fn sample_document() -> String {
        export_document(&[
            export_row(
                "2021-06-15 18:22:07 UTC",
                "Image",
                "Latitude, Longitude: 40.7, -74.0",
                "downloadMemories('https://example.com/a?sig=1&amp;k=2', true)",
            ),
            export_row(
                "2022-01-03 09:10:11 UTC",
                "Video",
                "",
                "downloadMemories('https://example.com/b')",
            ),
            export_row(
                "2022-01-03 09:10:11 UTC",
                "Image",
                "Latitude, Longitude: 0.0, 0.0",
                "downloadMemories('https://example.com/c', false)",
            ),
        ])
    }

    #[test]
    fn test_extracts_all_valid_rows() {
        let items = extract(&sample_document());
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].date_text, "2021-06-15 18:22:07 UTC");
        assert_eq!(items[0].media_kind, MediaKind::Image);
        // Entities inside the URL are unescaped.
        assert_eq!(items[0].source_url, "https://example.com/a?sig=1&k=2");
        assert!(items[0].requires_route_header);
        assert_eq!(items[0].ordinal, 0);

        assert_eq!(items[1].media_kind, MediaKind::Video);
        assert_eq!(items[1].location, None);
        assert!(!items[1].requires_route_header);

        assert!(!items[2].requires_route_header);
        assert_eq!(items[2].ordinal, 2);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let document = sample_document();
        assert_eq!(extract(&document), extract(&document));
    }

    #[test]
    fn test_timestamps_parse_with_zone_marker() {
        let items = extract(&sample_document());
        let taken = items[0].taken_at.unwrap();
        assert_eq!(taken.year(), 2021);
        assert_eq!(u8::from(taken.month()), 6);
        assert_eq!(taken.day(), 15);
    }

    #[test]
    fn test_unparseable_date_leaves_item_undated() {
        let document = export_document(&[export_row(
            "sometime in june",
            "Image",
            "",
            "downloadMemories('https://example.com/a')",
        )]);
        let items = extract(&document);
        assert_eq!(items.len(), 1);
        assert!(items[0].taken_at.is_none());
        assert_eq!(items[0].year(), None);
    }

    #[test]
    fn test_rows_missing_cells_are_skipped() {
        let document = export_document(&[
            "<tr><td>2021-06-15 18:22:07 UTC</td><td>Image</td></tr>".to_string(),
            export_row(
                "2022-01-03 09:10:11 UTC",
                "Video",
                "",
                "downloadMemories('https://example.com/b')",
            ),
        ]);
        let items = extract(&document);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].media_kind, MediaKind::Video);
    }

    #[test]
    fn test_rows_without_directive_are_skipped() {
        let document = export_document(&[export_row(
            "2022-01-03 09:10:11 UTC",
            "Video",
            "",
            "somethingElse('https://example.com/b')",
        )]);
        assert!(extract(&document).is_empty());
    }

    #[test]
    fn test_all_malformed_rows_yield_empty_list() {
        let rows: Vec<String> = (0..5)
            .map(|i| format!("<tr><td>row {i}</td><td>Image</td><td></td></tr>"))
            .collect();
        assert!(extract(&export_document(&rows)).is_empty());
    }

    #[test]
    fn test_document_without_table_yields_empty_list() {
        assert!(extract("<html><body><p>nothing here</p></body></html>").is_empty());
    }
}
