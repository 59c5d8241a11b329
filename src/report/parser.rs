use log::debug;
use url::Url;

use crate::error::{Result, TriageError};

/// Anchor proving the fetched document is a syzbot report page at all.
/// Checked before any crash table logic so that arbitrary fetched content
/// (error pages, fetch-failure bodies) produces a precise diagnostic.
const REPORT_MARKER: &str = r#"<a href="/upstream">syzbot</a>"#;

/// Anchor of the structured crash table within a report page.
const CRASH_TABLE_MARKER: &str = "<caption>Crashes";

/// One row of a report's crash table.
///
/// Optional fields are `None` when the column is missing or the cell carries
/// no link, never an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashRecord {
    pub title: String,
    /// Link to the C reproducer source, if the row has one
    pub repro: Option<String>,
    /// Link to the kernel config the crash was observed with
    pub config: Option<String>,
    /// Kernel commit hash the crash was observed at
    pub commit: Option<String>,
}

/// Extracts structured crash records from raw report HTML.
///
/// The scraping is string-based on purpose: report pages are semi-structured
/// and this is the single place that knows their markup, unit-tested against
/// captured document fixtures.
pub struct CrashTableParser {
    base: Url,
}

impl CrashTableParser {
    /// `base` is the URL the report was fetched from; relative links in the
    /// crash table resolve against it.
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn parse(&self, html: &str) -> Result<Vec<CrashRecord>> {
        if !html.contains(REPORT_MARKER) {
            return Err(TriageError::NotAReport);
        }
        let title = page_title(html);

        let table = find_crash_table(html).ok_or(TriageError::NoCrashTable)?;
        let records = self.extract_records(table, &title);
        debug!("Extracted {} crash record(s)", records.len());

        if records.is_empty() {
            return Err(TriageError::NoValidCrashes);
        }
        Ok(records)
    }

    /// Pick the record a reproduction attempt can actually use: the first
    /// row carrying a reproducer link.
    pub fn select_reproducible(records: &[CrashRecord]) -> Result<&CrashRecord> {
        records
            .iter()
            .find(|r| r.repro.is_some())
            .ok_or(TriageError::NoValidCrashes)
    }

    fn extract_records(&self, table: &str, title: &str) -> Vec<CrashRecord> {
        let rows = tag_contents(table, "tr");
        let Some((header, data_rows)) = rows.split_first() else {
            return Vec::new();
        };

        let columns: Vec<String> = tag_contents(header, "th")
            .iter()
            .map(|cell| strip_tags(cell))
            .collect();
        let commit_col = columns.iter().position(|c| c == "Commit");
        let repro_col = columns.iter().position(|c| c == "C repro");
        let config_col = columns.iter().position(|c| c == "Config");

        let mut records = Vec::new();
        for row in data_rows {
            let cells = tag_contents(row, "td");
            if cells.is_empty() {
                continue;
            }
            let record = CrashRecord {
                title: title.to_string(),
                repro: self.cell_link(&cells, repro_col),
                config: self.cell_link(&cells, config_col),
                commit: cell_text(&cells, commit_col),
            };
            debug!("{record:?}");
            records.push(record);
        }
        records
    }

    fn cell_link(&self, cells: &[&str], col: Option<usize>) -> Option<String> {
        let href = first_href(cells.get(col?)?)?;
        self.base.join(&href).ok().map(|url| url.to_string())
    }
}

fn page_title(html: &str) -> String {
    let start = match html.find("<title>") {
        Some(pos) => pos + "<title>".len(),
        None => return "(untitled report)".to_string(),
    };
    match html[start..].find("</title>") {
        Some(end) => html[start..start + end].trim().to_string(),
        None => "(untitled report)".to_string(),
    }
}

/// Locate the table enclosing the crash caption marker. Returns the markup
/// between the table's opening tag and its caption plus everything up to the
/// closing tag.
fn find_crash_table(html: &str) -> Option<&str> {
    let caption = html.find(CRASH_TABLE_MARKER)?;
    let start = html[..caption].rfind("<table")?;
    let end = html[caption..].find("</table>")?;
    Some(&html[start..caption + end])
}

/// Inner content of every non-nested `<tag ...>...</tag>` occurrence, in
/// document order. Tolerates attributes on the opening tag and ignores
/// prefixes of longer tag names (`<th` does not match `<thead`).
fn tag_contents<'a>(fragment: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut contents = Vec::new();
    let mut offset = 0;

    while let Some(pos) = fragment[offset..].find(&open) {
        let tag_start = offset + pos;
        let after_name = &fragment[tag_start + open.len()..];
        match after_name.chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => {}
            _ => {
                offset = tag_start + open.len();
                continue;
            }
        }

        let Some(gt) = after_name.find('>') else {
            break;
        };
        let body_start = tag_start + open.len() + gt + 1;
        let Some(end) = fragment[body_start..].find(&close) else {
            break;
        };
        contents.push(&fragment[body_start..body_start + end]);
        offset = body_start + end + close.len();
    }
    contents
}

fn cell_text(cells: &[&str], col: Option<usize>) -> Option<String> {
    let text = strip_tags(cells.get(col?)?);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Drop markup, keep text. Good enough for table cells; not a general HTML
/// text extractor.
fn strip_tags(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    decode_entities(&text).trim().to_string()
}

fn first_href(fragment: &str) -> Option<String> {
    let start = fragment.find("href=\"")? + "href=\"".len();
    let end = fragment[start..].find('"')?;
    Some(decode_entities(&fragment[start..start + end]))
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}
