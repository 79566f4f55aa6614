//! ep-results: parsing and archiving of EnergyPlus outputs.

pub mod collect;
pub mod html_report;
pub mod store;
pub mod table;
pub mod time_series;

pub use collect::{CollectedResults, collect_results};
pub use html_report::{ReportTables, UNGROUPED_KEY, read_html_report, report_file_name, slugify};
pub use store::{BackupManifest, BackupStore};
pub use table::{ColumnKind, Table, Value};
pub use time_series::{OutputData, read_time_series, series_name};

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Backup not found: {dir_name}")]
    BackupNotFound { dir_name: String },

    #[error("Backup source directory does not exist: {path}")]
    MissingSource { path: std::path::PathBuf },
}
