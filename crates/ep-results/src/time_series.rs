//! CSV time-series outputs.

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::ResultsResult;
use crate::table::Table;

/// A parsed output artifact, or its raw text when parsing failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum OutputData {
    Table(Table),
    Raw(String),
}

impl OutputData {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            OutputData::Table(t) => Some(t),
            OutputData::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            OutputData::Raw(s) => Some(s),
            OutputData::Table(_) => None,
        }
    }
}

/// Series name for a CSV file stem: `eplus -> eplus`, `eplus-meter -> meter`.
pub fn series_name(stem: &str, prefix: &str) -> String {
    if stem == prefix {
        return stem.to_string();
    }
    stem.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(stem)
        .to_string()
}

fn parse_csv(path: &Path) -> Result<Table, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)?;

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table::from_records(header, records, false))
}

/// Read one CSV file, degrading to its raw text if it does not parse, and to
/// empty text if it cannot be read at all.
pub fn read_csv_output(path: &Path) -> ResultsResult<OutputData> {
    match parse_csv(path) {
        Ok(table) => Ok(OutputData::Table(table)),
        Err(err) => {
            tracing::warn!(
                file = %path.display(),
                error = %err,
                "unable to parse csv file, returning raw text as fallback"
            );
            match fs::read(path) {
                Ok(bytes) => Ok(OutputData::Raw(String::from_utf8_lossy(&bytes).into_owned())),
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "unable to read csv file");
                    Ok(OutputData::Raw(String::new()))
                }
            }
        }
    }
}

/// Read every `*.csv` file directly inside `dir`.
pub fn read_time_series(dir: &Path, prefix: &str) -> ResultsResult<BTreeMap<String, OutputData>> {
    let mut series = BTreeMap::new();

    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();

    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = series_name(stem, prefix);
        tracing::debug!(file = %path.display(), series = %name, "reading csv output");
        series.insert(name, read_csv_output(&path)?);
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    #[test]
    fn strips_prefix_from_series_names() {
        assert_eq!(series_name("eplus", "eplus"), "eplus");
        assert_eq!(series_name("eplus-meter", "eplus"), "meter");
        assert_eq!(series_name("eplusout", "eplus"), "eplusout");
        assert_eq!(series_name("other", "eplus"), "other");
    }

    #[test]
    fn reads_typed_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("eplus.csv"),
            "Date/Time,Outdoor Temp [C](Hourly),Count\n 01/01  01:00:00,-1.5,3\n 01/01  02:00:00,-2,4\n",
        )
        .unwrap();

        let series = read_time_series(dir.path(), "eplus").unwrap();
        let table = series["eplus"].as_table().unwrap();
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.rows[1][1], Value::Float(-2.0));
        assert_eq!(table.rows[0][2], Value::Int(3));
    }

    #[test]
    fn malformed_csv_falls_back_to_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let content = "a,b\n1,2\n3,4,5\n";
        fs::write(dir.path().join("eplus-broken.csv"), content).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let series = read_time_series(dir.path(), "eplus").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series["broken"].as_raw(), Some(content));
    }

    #[test]
    fn unreadable_csv_becomes_empty_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let output = read_csv_output(&dir.path().join("vanished.csv")).unwrap();
        assert_eq!(output.as_raw(), Some(""));
    }
}
