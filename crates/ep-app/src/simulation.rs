//! The per-run record: inputs, status, log and parsed outputs.

use chrono::{DateTime, Utc};
use ep_core::{RunStatus, SimulationName};
use ep_results::{BackupStore, OutputData, ReportTables, collect_results};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Inputs of one run, fixed once it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSpec {
    pub name: SimulationName,
    pub model_file: PathBuf,
    pub weather_file: PathBuf,
    /// The run's working directory. Removed when the run completes.
    pub working_dir: PathBuf,
}

/// When a working directory is archived before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStrategy {
    Always,
    #[default]
    OnError,
    #[serde(rename = "none", alias = "disabled")]
    Disabled,
}

impl BackupStrategy {
    pub fn should_backup(self, status: RunStatus) -> bool {
        match self {
            BackupStrategy::Always => status.is_terminal(),
            BackupStrategy::OnError => {
                matches!(status, RunStatus::Failed | RunStatus::Interrupted)
            }
            BackupStrategy::Disabled => false,
        }
    }
}

impl FromStr for BackupStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(BackupStrategy::Always),
            "on_error" | "on-error" => Ok(BackupStrategy::OnError),
            "none" | "disabled" => Ok(BackupStrategy::Disabled),
            other => Err(AppError::Config(format!(
                "unknown backup strategy {:?} (expected always, on_error or none)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub spec: SimulationSpec,
    status: RunStatus,
    log: String,
    reports: ReportTables,
    time_series: BTreeMap<String, OutputData>,
    error: Option<String>,
    backup_path: Option<PathBuf>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Simulation {
    pub fn new(spec: SimulationSpec) -> Self {
        Self {
            spec,
            status: RunStatus::Pending,
            log: String::new(),
            reports: ReportTables::new(),
            time_series: BTreeMap::new(),
            error: None,
            backup_path: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn name(&self) -> &SimulationName {
        &self.spec.name
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// HTML report tables: group key, then table title.
    pub fn tables(&self) -> &ReportTables {
        &self.reports
    }

    pub fn time_series(&self) -> &BTreeMap<String, OutputData> {
        &self.time_series
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Move to `next`. Illegal transitions leave the record untouched.
    pub(crate) fn mark(&mut self, next: RunStatus) {
        match self.status.transition(next) {
            Ok(status) => {
                self.status = status;
                if status == RunStatus::Running {
                    self.started_at = Some(Utc::now());
                } else if status.is_terminal() {
                    self.finished_at = Some(Utc::now());
                }
                tracing::debug!(name = %self.spec.name, status = %status, "status changed");
            }
            Err(err) => {
                tracing::error!(name = %self.spec.name, error = %err, "ignoring status change");
            }
        }
    }

    pub(crate) fn set_log(&mut self, log: String) {
        self.log = log;
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub(crate) fn set_backup_path(&mut self, path: PathBuf) {
        self.backup_path = Some(path);
    }

    /// Store parsed outputs. Only allowed while the run is in progress.
    pub fn set_results(
        &mut self,
        reports: ReportTables,
        time_series: BTreeMap<String, OutputData>,
    ) -> AppResult<()> {
        if self.status.is_terminal() {
            return Err(AppError::PostProcess(format!(
                "results of {} are frozen once the run is {}",
                self.spec.name, self.status
            )));
        }
        self.reports = reports;
        self.time_series = time_series;
        Ok(())
    }

    /// Copy the working directory to `<target>/<status>_<name>`.
    pub fn backup(&self, target: &Path) -> AppResult<PathBuf> {
        let store = BackupStore::new(target);
        let dest = store.backup(&self.spec.working_dir, self.status, &self.spec.name)?;
        tracing::info!(name = %self.spec.name, dest = %dest.display(), "working directory backed up");
        Ok(dest)
    }
}

/// Post-run hook filling a simulation's results from its working directory.
pub trait PostProcess: Send + Sync {
    fn process(&self, simulation: &mut Simulation, output_prefix: &str) -> AppResult<()>;
}

impl<F> PostProcess for F
where
    F: Fn(&mut Simulation, &str) -> AppResult<()> + Send + Sync,
{
    fn process(&self, simulation: &mut Simulation, output_prefix: &str) -> AppResult<()> {
        self(simulation, output_prefix)
    }
}

/// Default hook: HTML report tables plus every CSV output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectResults;

impl PostProcess for CollectResults {
    fn process(&self, simulation: &mut Simulation, output_prefix: &str) -> AppResult<()> {
        let collected = collect_results(&simulation.spec.working_dir, output_prefix)?;
        simulation.set_results(collected.tables, collected.time_series)
    }
}
