//! Run service for EnergyPlus simulations.
//!
//! This crate stages inputs into isolated working directories, invokes the
//! engine, collects its outputs into tables and archives failed runs. It is
//! the layer both the CLI and library callers go through.

pub mod config;
pub mod error;
pub mod invoker;
pub mod progress;
pub mod runner;
pub mod simulation;
pub mod staging;

// Re-export key types for convenience
pub use config::{
    EngineKind, EnergyPlusRoot, RunnerConfig, install_energyplus, load_config, save_config,
};
pub use error::{AppError, AppResult};
pub use invoker::{
    CancelToken, EngineCommand, EngineOptions, Invocation, InvokeOutcome, engine_version, invoke,
};
pub use progress::{ProgressSink, RunProgressEvent, RunStage};
pub use runner::{EPlusRunner, RunFailure, RunOptions, Sample};
pub use simulation::{BackupStrategy, CollectResults, PostProcess, Simulation, SimulationSpec};
pub use staging::{ModelSource, StagedInputs, WorkingDir, stage, validate_inputs};

pub use ep_core::{RunStatus, SimulationName, VersionMismatchAction};
pub use ep_results::{OutputData, ReportTables, Table, Value};
