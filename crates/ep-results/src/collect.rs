//! Post-run scan of a working directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ResultsResult;
use crate::html_report::{ReportTables, read_html_report, report_file_name};
use crate::time_series::{OutputData, read_time_series};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedResults {
    pub tables: ReportTables,
    pub time_series: BTreeMap<String, OutputData>,
}

/// Collect the HTML report tables and every CSV series found in `dir`.
///
/// Individual artifacts never fail the collection: malformed CSV comes back
/// as raw text, an unreadable report as an empty mapping.
pub fn collect_results(dir: &Path, prefix: &str) -> ResultsResult<CollectedResults> {
    let report_path = dir.join(report_file_name(prefix));
    let tables = match read_html_report(&report_path) {
        Ok(tables) => tables,
        Err(err) => {
            tracing::warn!(
                file = %report_path.display(),
                error = %err,
                "unable to read html report"
            );
            ReportTables::new()
        }
    };

    let time_series = read_time_series(dir, prefix)?;

    tracing::debug!(
        dir = %dir.display(),
        report_groups = tables.len(),
        series = time_series.len(),
        "collected results"
    );

    Ok(CollectedResults {
        tables,
        time_series,
    })
}
