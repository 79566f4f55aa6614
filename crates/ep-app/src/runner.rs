//! Orchestration of single runs and batches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use ep_core::{RunStatus, SimulationName, VersionMismatchAction, check_version_compat};
use rayon::prelude::*;

use crate::config::{EngineKind, EnergyPlusRoot, RunnerConfig};
use crate::error::{AppError, AppResult};
use crate::invoker::{self, CancelToken, EngineCommand, EngineOptions, InvokeOutcome};
use crate::progress::{ProgressSink, RunProgressEvent, RunStage};
use crate::simulation::{BackupStrategy, CollectResults, PostProcess, Simulation, SimulationSpec};
use crate::staging::{self, ModelSource, StagedInputs, WorkingDir};

/// Per-run overrides of the runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Generated when unset.
    pub name: Option<SimulationName>,
    pub backup_strategy: Option<BackupStrategy>,
    pub version_mismatch_action: Option<VersionMismatchAction>,
    /// Replaces the runner's `Energy+.idd` for this run.
    pub idd_file: Option<PathBuf>,
}

impl RunOptions {
    pub fn named(name: SimulationName) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct Sample {
    pub model: ModelSource,
    /// Per-sample weather file. Exclusive with the batch's shared weather.
    pub weather: Option<PathBuf>,
}

impl Sample {
    pub fn new(model: impl Into<ModelSource>) -> Self {
        Self {
            model: model.into(),
            weather: None,
        }
    }

    pub fn with_weather(mut self, weather: impl Into<PathBuf>) -> Self {
        self.weather = Some(weather.into());
        self
    }
}

/// A run that did not finish, with its record.
#[derive(Debug)]
pub struct RunFailure {
    pub simulation: Box<Simulation>,
    pub error: AppError,
}

/// Runs EnergyPlus simulations, one isolated working directory each.
pub struct EPlusRunner {
    config: RunnerConfig,
    engine: EngineCommand,
    idd_file: Option<PathBuf>,
    engine_options: EngineOptions,
    timeout: Option<Duration>,
    post_process: Arc<dyn PostProcess>,
    cancel: CancelToken,
    progress: Option<ProgressSink>,
    engine_version: OnceLock<Option<String>>,
}

impl std::fmt::Debug for EPlusRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EPlusRunner")
            .field("engine", &self.engine)
            .field("idd_file", &self.idd_file)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EPlusRunner {
    pub fn new(config: RunnerConfig) -> AppResult<Self> {
        config.validate()?;
        let timeout = config.timeout()?;

        let root = config
            .energyplus_root
            .as_deref()
            .map(EnergyPlusRoot::new)
            .transpose()?;

        let engine = match &config.engine {
            EngineKind::Local => {
                let binary = match (&config.binary, &root) {
                    (Some(binary), _) => require_file("EnergyPlus executable", binary)?,
                    (None, Some(root)) => root.binary()?,
                    (None, None) => {
                        return Err(AppError::Config(
                            "local runs need an energyplus_root or a binary".to_string(),
                        ));
                    }
                };
                EngineCommand::Local { binary }
            }
            EngineKind::Docker { image, tag } => EngineCommand::Docker {
                image: image.clone(),
                tag: tag.clone(),
            },
        };

        let idd_file = match (&config.idd_file, &root) {
            (Some(idd), _) => Some(require_file("Engine definition file", idd)?),
            (None, Some(root)) if config.engine == EngineKind::Local => {
                let idd = root.idd_file();
                if idd.is_file() {
                    Some(idd)
                } else {
                    tracing::debug!(root = %root.path().display(), "no Energy+.idd in root");
                    None
                }
            }
            _ => None,
        };

        let engine_options = EngineOptions {
            output_prefix: config.output_prefix.clone(),
            readvars: config.readvars,
            expand_objects: config.expand_objects,
            extra_args: config.extra_args.clone(),
        };

        tracing::debug!(engine = ?engine, "runner ready");
        Ok(Self {
            config,
            engine,
            idd_file,
            engine_options,
            timeout,
            post_process: Arc::new(CollectResults),
            cancel: CancelToken::new(),
            progress: None,
            engine_version: OnceLock::new(),
        })
    }

    /// Replace the default result collection.
    pub fn with_post_process(mut self, post_process: impl PostProcess + 'static) -> Self {
        self.post_process = Arc::new(post_process);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn emit(&self, name: &SimulationName, stage: RunStage, started: Instant, message: Option<String>) {
        if let Some(progress) = &self.progress {
            progress(&RunProgressEvent::stage(
                name.as_str(),
                stage,
                started.elapsed().as_secs_f64(),
                message,
            ));
        }
    }

    /// Engine version, resolved once per runner.
    pub fn engine_version(&self) -> Option<&str> {
        self.engine_version
            .get_or_init(|| self.resolve_engine_version())
            .as_deref()
    }

    fn resolve_engine_version(&self) -> Option<String> {
        let from_idd = || {
            let idd = self.idd_file.as_ref()?;
            let bytes = fs::read(idd).ok()?;
            ep_core::idd_version(&String::from_utf8_lossy(&bytes))
        };
        match &self.engine {
            EngineCommand::Local { binary } => match invoker::engine_version(binary) {
                Ok(Some(version)) => Some(version),
                Ok(None) => from_idd(),
                Err(err) => {
                    tracing::warn!(binary = %binary.display(), error = %err, "unable to query engine version");
                    from_idd()
                }
            },
            EngineCommand::Docker { tag, .. } => version_from_tag(tag),
        }
    }

    fn check_version(
        &self,
        working_dir: &WorkingDir,
        staged: &StagedInputs,
        action: VersionMismatchAction,
    ) -> AppResult<()> {
        if action == VersionMismatchAction::Ignore {
            return Ok(());
        }
        let Some(engine) = self.engine_version() else {
            tracing::warn!("EnergyPlus version unknown, skipping version check");
            return Ok(());
        };
        let bytes = fs::read(working_dir.path().join(&staged.model))?;
        let model = ep_core::model_version(&String::from_utf8_lossy(&bytes));
        check_version_compat(model.as_deref(), engine, action)?;
        Ok(())
    }

    fn fail_early(spec: SimulationSpec, status: RunStatus, error: AppError) -> RunFailure {
        let mut simulation = Simulation::new(spec);
        let message = error.to_string();
        simulation.set_log(message.clone());
        simulation.set_error(message);
        simulation.mark(status);
        RunFailure {
            simulation: Box::new(simulation),
            error,
        }
    }

    /// Run one simulation, returning the record whatever the outcome.
    ///
    /// Inputs are validated before anything is staged. A version mismatch
    /// under `raise` fails the run before the engine is spawned.
    pub fn try_run_one(
        &self,
        model: impl Into<ModelSource>,
        weather: &Path,
        options: &RunOptions,
    ) -> Result<Simulation, RunFailure> {
        let model = model.into();
        let name = options.name.clone().unwrap_or_else(SimulationName::generate);
        let started = Instant::now();
        let mut spec = SimulationSpec {
            name: name.clone(),
            model_file: model.display_path(),
            weather_file: weather.to_path_buf(),
            working_dir: PathBuf::new(),
        };

        self.emit(&name, RunStage::Staging, started, None);
        let idd = options.idd_file.as_deref().or(self.idd_file.as_deref());
        let staged = staging::validate_inputs(&model, weather, idd)
            .and_then(|()| WorkingDir::create(self.config.temp_dir.as_deref()))
            .and_then(|wd| {
                let staged = staging::stage(&wd, &model, weather, idd)?;
                Ok((wd, staged))
            });
        let (working_dir, staged) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                tracing::error!(name = %name, error = %err, "unable to prepare run");
                return Err(Self::fail_early(spec, RunStatus::Failed, err));
            }
        };
        spec.working_dir = working_dir.path().to_path_buf();
        tracing::info!(name = %name, dir = %spec.working_dir.display(), "inputs staged");

        self.emit(&name, RunStage::CheckingVersion, started, None);
        let action = options
            .version_mismatch_action
            .unwrap_or(self.config.version_mismatch_action);
        if let Err(err) = self.check_version(&working_dir, &staged, action) {
            tracing::error!(name = %name, error = %err, "version check failed");
            Self::release(working_dir);
            return Err(Self::fail_early(spec, RunStatus::Failed, err));
        }

        if self.cancel.is_cancelled() {
            Self::release(working_dir);
            let err = AppError::Interrupted {
                name: name.to_string(),
                log: String::new(),
            };
            return Err(Self::fail_early(spec, RunStatus::Interrupted, err));
        }

        let mut simulation = Simulation::new(spec);
        simulation.mark(RunStatus::Running);
        self.emit(&name, RunStage::Running, started, None);
        tracing::info!(name = %name, "running EnergyPlus");

        let invocation = self
            .engine
            .build(&staged, working_dir.path(), &self.engine_options);
        let error = match invoker::invoke(invocation, &self.cancel, self.timeout) {
            Ok(InvokeOutcome::Success { log }) => {
                simulation.set_log(log);
                self.emit(&name, RunStage::CollectingResults, started, None);
                match self
                    .post_process
                    .process(&mut simulation, &self.config.output_prefix)
                {
                    Ok(()) => {
                        simulation.mark(RunStatus::Finished);
                        None
                    }
                    Err(err) => {
                        simulation.mark(RunStatus::Failed);
                        Some(err)
                    }
                }
            }
            Ok(InvokeOutcome::Failed { code, reason, log }) => {
                simulation.set_log(log.clone());
                simulation.mark(RunStatus::Failed);
                Some(AppError::ExecutionFailed {
                    name: name.to_string(),
                    code,
                    reason,
                    log,
                })
            }
            Ok(InvokeOutcome::Interrupted { log }) => {
                simulation.set_log(log.clone());
                simulation.mark(RunStatus::Interrupted);
                Some(AppError::Interrupted {
                    name: name.to_string(),
                    log,
                })
            }
            Err(err) => {
                simulation.set_log(err.to_string());
                simulation.mark(RunStatus::Failed);
                Some(err)
            }
        };
        if let Some(err) = &error {
            tracing::error!(name = %name, status = %simulation.status(), error = %err, "run did not finish");
            simulation.set_error(err.to_string());
        }

        let strategy = options
            .backup_strategy
            .unwrap_or(self.config.backup_strategy);
        if strategy.should_backup(simulation.status()) {
            self.emit(&name, RunStage::BackingUp, started, None);
            match simulation.backup(&self.config.backup_dir) {
                Ok(dest) => simulation.set_backup_path(dest),
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "backup failed");
                }
            }
        }
        Self::release(working_dir);

        let message = simulation.status().to_string();
        self.emit(&name, RunStage::Completed, started, Some(message));
        tracing::info!(
            name = %name,
            status = %simulation.status(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "run complete"
        );

        match error {
            None => Ok(simulation),
            Some(error) => Err(RunFailure {
                simulation: Box::new(simulation),
                error,
            }),
        }
    }

    fn release(working_dir: WorkingDir) {
        if let Err(err) = working_dir.finalize() {
            tracing::warn!(error = %err, "unable to remove working directory");
        }
    }

    /// Run one simulation. Any status other than `finished` is an error.
    pub fn run_one(
        &self,
        model: impl Into<ModelSource>,
        weather: &Path,
        options: &RunOptions,
    ) -> AppResult<Simulation> {
        self.try_run_one(model, weather, options)
            .map_err(|failure| failure.error)
    }

    /// Run every sample on a pool of `workers` threads.
    ///
    /// Exactly one of the sample's own weather file and `shared_weather` must
    /// be given; inconsistent batches are rejected before anything runs. Runs
    /// that fail are returned as records with their error and log.
    pub fn run_many(
        &self,
        samples: BTreeMap<String, Sample>,
        shared_weather: Option<&Path>,
    ) -> AppResult<BTreeMap<String, Simulation>> {
        let mut jobs = Vec::with_capacity(samples.len());
        for (key, sample) in samples {
            let weather = match (sample.weather, shared_weather) {
                (Some(_), Some(_)) => {
                    return Err(AppError::Batch(format!(
                        "sample {:?} has its own weather file but a shared one was given",
                        key
                    )));
                }
                (None, None) => {
                    return Err(AppError::Batch(format!(
                        "sample {:?} has no weather file and no shared one was given",
                        key
                    )));
                }
                (Some(own), None) => own,
                (None, Some(shared)) => shared.to_path_buf(),
            };
            let name = SimulationName::new(key.clone())?;
            jobs.push((key, name, sample.model, weather));
        }

        let workers = self.config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("eplus-worker-{}", i))
            .build()
            .map_err(|e| AppError::Batch(format!("unable to start worker pool: {}", e)))?;

        tracing::info!(runs = jobs.len(), workers, "starting batch");
        let started = Instant::now();

        let results: Vec<(String, Simulation)> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(key, name, model, weather)| {
                    let options = RunOptions::named(name.clone());
                    if self.cancel.is_cancelled() {
                        let spec = SimulationSpec {
                            name: name.clone(),
                            model_file: model.display_path(),
                            weather_file: weather,
                            working_dir: PathBuf::new(),
                        };
                        let err = AppError::Interrupted {
                            name: name.to_string(),
                            log: String::new(),
                        };
                        let failure = Self::fail_early(spec, RunStatus::Interrupted, err);
                        return (key, *failure.simulation);
                    }
                    match self.try_run_one(model, &weather, &options) {
                        Ok(simulation) => (key, simulation),
                        Err(failure) => (key, *failure.simulation),
                    }
                })
                .collect()
        });

        let finished = results
            .iter()
            .filter(|(_, sim)| sim.status() == RunStatus::Finished)
            .count();
        tracing::info!(
            runs = results.len(),
            finished,
            elapsed_s = started.elapsed().as_secs_f64(),
            "batch complete"
        );

        Ok(results.into_iter().collect())
    }
}

fn require_file(role: &'static str, path: &Path) -> AppResult<PathBuf> {
    staging::require_file(role, path)?;
    Ok(path.to_path_buf())
}

/// `8.4.0` -> `8.4`. Container tags carry the engine release.
fn version_from_tag(tag: &str) -> Option<String> {
    let mut parts = tag.trim_start_matches('v').split(['.', '-']);
    let major = parts.next().filter(|p| p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty())?;
    let minor = parts.next().filter(|p| p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty())?;
    Some(format!("{}.{}", major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_versions() {
        assert_eq!(version_from_tag("8.4.0"), Some("8.4".to_string()));
        assert_eq!(version_from_tag("v9.1.0-rc"), Some("9.1".to_string()));
        assert_eq!(version_from_tag("latest"), None);
    }

    #[test]
    fn local_engine_needs_a_root() {
        let err = EPlusRunner::new(RunnerConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn docker_runner_needs_no_root() {
        let config = RunnerConfig {
            engine: EngineKind::Docker {
                image: "nrel/energyplus".to_string(),
                tag: "8.4.0".to_string(),
            },
            ..Default::default()
        };
        let runner = EPlusRunner::new(config).unwrap();
        assert_eq!(runner.engine_version(), Some("8.4"));
    }

    #[test]
    fn rejects_inconsistent_batches_before_running() {
        let config = RunnerConfig {
            engine: EngineKind::Docker {
                image: "nrel/energyplus".to_string(),
                tag: "8.4.0".to_string(),
            },
            ..Default::default()
        };
        let runner = EPlusRunner::new(config).unwrap();

        let mut samples = BTreeMap::new();
        samples.insert("a".to_string(), Sample::new(PathBuf::from("a.idf")));
        let err = runner.run_many(samples.clone(), None).unwrap_err();
        assert!(matches!(err, AppError::Batch(_)));

        samples.insert(
            "b".to_string(),
            Sample::new(PathBuf::from("b.idf")).with_weather("b.epw"),
        );
        let err = runner
            .run_many(samples, Some(Path::new("shared.epw")))
            .unwrap_err();
        assert!(matches!(err, AppError::Batch(_)));
    }

    #[test]
    fn missing_inputs_fail_before_staging() {
        let config = RunnerConfig {
            engine: EngineKind::Docker {
                image: "nrel/energyplus".to_string(),
                tag: "8.4.0".to_string(),
            },
            ..Default::default()
        };
        let runner = EPlusRunner::new(config).unwrap();
        let failure = runner
            .try_run_one(
                PathBuf::from("/nope/model.idf"),
                Path::new("/nope/weather.epw"),
                &RunOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(failure.error, AppError::InputValidation { role: "Model file", .. }));
        assert_eq!(failure.simulation.status(), RunStatus::Failed);
        assert!(failure.simulation.log().contains("Model file not found"));
    }

    #[test]
    fn configured_binary_and_idd_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            binary: Some(dir.path().join("energyplus")),
            ..Default::default()
        };
        let err = EPlusRunner::new(config).unwrap_err();
        assert!(matches!(err, AppError::InputValidation { role: "EnergyPlus executable", .. }));

        let config = RunnerConfig {
            engine: EngineKind::Docker {
                image: "nrel/energyplus".to_string(),
                tag: "8.4.0".to_string(),
            },
            idd_file: Some(dir.path().join("custom.idd")),
            ..Default::default()
        };
        let err = EPlusRunner::new(config).unwrap_err();
        assert!(matches!(err, AppError::InputValidation { role: "Engine definition file", .. }));
    }
}
