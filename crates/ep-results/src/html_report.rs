//! Tabular HTML report (`<prefix>-table.htm`).
//!
//! EnergyPlus writes each report as a run of markers followed by titled tables:
//!
//! ```text
//! <p>Report:<b> Annual Building Utility Performance Summary</b></p>
//! <p>For:<b> Entire Facility</b></p>
//! <b>Site and Source Energy</b><br><br>
//! <table> ... </table>
//! ```
//!
//! Tables are grouped by `slugify("<report> <for>")`, then keyed by title.

use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::ResultsResult;
use crate::table::Table;

/// Group key -> table title -> table.
pub type ReportTables = BTreeMap<String, BTreeMap<String, Table>>;

/// Group key used when no `Report:`/`For:` marker precedes a table.
pub const UNGROUPED_KEY: &str = "null";

pub fn report_file_name(prefix: &str) -> String {
    format!("{}-table.htm", prefix)
}

/// Lowercase ASCII slug with `-` separators.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn group_key(report: Option<&str>, for_marker: Option<&str>) -> String {
    let label = match (report, for_marker) {
        (Some(r), Some(f)) => format!("{} {}", r, f),
        (Some(only), None) | (None, Some(only)) => only.to_string(),
        (None, None) => return UNGROUPED_KEY.to_string(),
    };
    let slug = slugify(&label);
    if slug.is_empty() {
        UNGROUPED_KEY.to_string()
    } else {
        slug
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn has_ancestor(el: &ElementRef, names: &[&str]) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| names.contains(&e.name()))
    })
}

fn parse_table(table: &ElementRef, rows_sel: &Selector, cells_sel: &Selector) -> Table {
    let mut rows: Vec<Vec<String>> = table
        .select(rows_sel)
        .map(|tr| tr.select(cells_sel).map(|cell| element_text(&cell)).collect())
        .collect();

    if rows.is_empty() {
        return Table::default();
    }
    let header = rows.remove(0);
    rows.retain(|row: &Vec<String>| row.iter().any(|cell| !cell.is_empty()));

    Table::from_records(header, rows, true)
}

fn insert_unique(group: &mut BTreeMap<String, Table>, title: String, table: Table) {
    if !group.contains_key(&title) {
        group.insert(title, table);
        return;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", title, n);
        if !group.contains_key(&candidate) {
            group.insert(candidate, table);
            return;
        }
        n += 1;
    }
}

/// Parse report HTML into grouped tables.
pub fn parse_html_report(html: &str) -> ReportTables {
    let document = Html::parse_document(html);
    let walk_sel = Selector::parse("p, b, table").expect("valid selector");
    let rows_sel = Selector::parse("tr").expect("valid selector");
    let cells_sel = Selector::parse("td, th").expect("valid selector");

    let mut reports = ReportTables::new();
    let mut report: Option<String> = None;
    let mut for_marker: Option<String> = None;
    let mut title: Option<String> = None;
    let mut untitled = 0usize;

    for el in document.select(&walk_sel) {
        match el.value().name() {
            "p" => {
                let text = element_text(&el);
                if let Some(rest) = text.strip_prefix("Report:") {
                    report = Some(rest.trim().to_string());
                    for_marker = None;
                } else if let Some(rest) = text.strip_prefix("For:") {
                    for_marker = Some(rest.trim().to_string());
                }
            }
            "b" => {
                if !has_ancestor(&el, &["p", "table"]) {
                    let text = element_text(&el);
                    if !text.is_empty() {
                        title = Some(text);
                    }
                }
            }
            "table" => {
                if has_ancestor(&el, &["table"]) {
                    continue;
                }
                let key = group_key(report.as_deref(), for_marker.as_deref());
                let table_title = title.take().unwrap_or_else(|| {
                    untitled += 1;
                    format!("table-{}", untitled)
                });
                let table = parse_table(&el, &rows_sel, &cells_sel);
                insert_unique(reports.entry(key).or_default(), table_title, table);
            }
            _ => {}
        }
    }

    reports
}

/// Read the HTML report at `path`. A missing file yields an empty mapping.
pub fn read_html_report(path: &Path) -> ResultsResult<ReportTables> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "no html report found");
        return Ok(ReportTables::new());
    }
    let bytes = fs::read(path)?;
    Ok(parse_html_report(&String::from_utf8_lossy(&bytes)))
}
