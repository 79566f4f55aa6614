use clap::{Parser, Subcommand};
use ep_app::{
    AppError, AppResult, BackupStrategy, CancelToken, EPlusRunner, EnergyPlusRoot, EngineKind,
    RunOptions, RunProgressEvent, RunnerConfig, Sample, Simulation, SimulationName,
    VersionMismatchAction, config::EPLUS_DIR_ENV,
};
use ep_install::InstallConfig;
use ep_results::BackupStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ep-cli")]
#[command(about = "Run EnergyPlus simulations in isolated working directories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and install an EnergyPlus release (Linux)
    Install {
        /// Installer URL, e.g. .../EnergyPlus-8.7.0-78a111df4a-Linux-x86_64.sh
        url: String,
        /// Install root (defaults to the per-user data directory)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Keep downloaded installers here
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Show the model and engine versions
    Version {
        /// Path to the model (IDF) file
        model: PathBuf,
        /// EnergyPlus install directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Run one simulation
    Run {
        /// Path to the model (IDF) file
        model: PathBuf,
        /// Path to the weather (EPW) file
        weather: PathBuf,
        /// Simulation name (generated when omitted)
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
        /// Backup strategy: always, on_error or none
        #[arg(long)]
        backup: Option<BackupStrategy>,
        /// Version mismatch action: raise, warn or ignore
        #[arg(long)]
        mismatch: Option<VersionMismatchAction>,
    },
    /// Run every simulation listed in a YAML manifest
    Batch {
        /// YAML mapping of name -> { model, weather? }
        manifest: PathBuf,
        /// Weather file shared by every entry
        #[arg(long)]
        weather: Option<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// List archived working directories
    Backups {
        /// Backup directory
        #[arg(default_value = "./backup")]
        dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Runner config YAML file
    #[arg(long)]
    config: Option<PathBuf>,
    /// EnergyPlus install directory (overrides config and EPLUS_DIR)
    #[arg(long)]
    root: Option<PathBuf>,
    /// EnergyPlus executable, used instead of the one under the root
    #[arg(long)]
    binary: Option<PathBuf>,
    /// Energy+.idd file passed to every run
    #[arg(long)]
    idd: Option<PathBuf>,
    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,
    /// Write the simulation records as JSON to this file
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    model: PathBuf,
    #[serde(default)]
    weather: Option<PathBuf>,
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install { url, root, cache } => cmd_install(&url, root, cache),
        Commands::Version { model, root } => cmd_version(&model, root.as_deref()),
        Commands::Run {
            model,
            weather,
            name,
            common,
            backup,
            mismatch,
        } => cmd_run(&model, &weather, name, &common, backup, mismatch),
        Commands::Batch {
            manifest,
            weather,
            common,
        } => cmd_batch(&manifest, weather.as_deref(), &common),
        Commands::Backups { dir } => cmd_backups(&dir),
    }
}

fn eplus_dir_env() -> Option<String> {
    std::env::var(EPLUS_DIR_ENV).ok()
}

fn cmd_install(url: &str, root: Option<PathBuf>, cache: Option<PathBuf>) -> AppResult<()> {
    let mut config = match root {
        Some(root) => InstallConfig::new(root),
        None => InstallConfig::user_default()?,
    };
    config.installer_cache = cache;

    println!("Installing EnergyPlus from {}", url);
    let installed = ep_app::install_energyplus(url, &config)?;
    println!("✓ EnergyPlus available at {}", installed.path().display());
    println!("  export {}={}", EPLUS_DIR_ENV, installed.path().display());
    Ok(())
}

fn cmd_version(model: &Path, root: Option<&Path>) -> AppResult<()> {
    let bytes = fs::read(model).map_err(|_| AppError::InputValidation {
        role: "Model file",
        path: model.to_path_buf(),
    })?;
    let model_version = ep_core::model_version(&String::from_utf8_lossy(&bytes));
    println!(
        "Model version:  {}",
        model_version.as_deref().unwrap_or("unknown")
    );

    let root = EnergyPlusRoot::discover(root, eplus_dir_env().as_deref())?;
    let engine_version = ep_app::engine_version(&root.binary()?)?;
    println!(
        "Engine version: {}",
        engine_version.as_deref().unwrap_or("unknown")
    );

    if model_version.is_some() && model_version == engine_version {
        println!("✓ Versions match");
    } else {
        println!("✗ Versions differ");
    }
    Ok(())
}

fn build_runner(common: &CommonArgs, cancel: &CancelToken) -> AppResult<EPlusRunner> {
    let mut config = match &common.config {
        Some(path) => ep_app::load_config(path)?,
        None => RunnerConfig::default(),
    };

    if common.binary.is_some() {
        config.binary = common.binary.clone();
    }
    if common.idd.is_some() {
        config.idd_file = common.idd.clone();
    }
    if config.engine == EngineKind::Local && (common.root.is_some() || config.binary.is_none()) {
        let root = EnergyPlusRoot::discover(
            common.root.as_deref().or(config.energyplus_root.as_deref()),
            eplus_dir_env().as_deref(),
        )?;
        config.energyplus_root = Some(root.path().to_path_buf());
    }
    if common.workers.is_some() {
        config.workers = common.workers;
    }

    let progress: ep_app::ProgressSink = Arc::new(|event: &RunProgressEvent| {
        render_progress(event);
    });
    Ok(EPlusRunner::new(config)?
        .with_cancel_token(cancel.clone())
        .with_progress(progress))
}

fn install_interrupt_handler() -> AppResult<CancelToken> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping EnergyPlus");
        handler_token.cancel();
    })
    .map_err(|e| AppError::Config(format!("unable to install Ctrl-C handler: {}", e)))?;
    Ok(cancel)
}

fn render_progress(event: &RunProgressEvent) {
    tracing::info!(
        name = %event.name,
        stage = event.stage.label(),
        message = event.message.as_deref().unwrap_or(""),
        elapsed_s = format_args!("{:.1}", event.elapsed_wall_s),
        "progress"
    );
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Results(format!("unable to serialize records: {}", e)))?;
    fs::write(path, json)?;
    tracing::info!(path = %path.display(), "records written");
    Ok(())
}

fn print_summary(simulation: &Simulation) {
    println!("  Status: {}", simulation.status());
    let table_count: usize = simulation.tables().values().map(|g| g.len()).sum();
    println!("  Report tables: {}", table_count);
    println!("  Time series: {}", simulation.time_series().len());
    if let Some(path) = simulation.backup_path() {
        println!("  Backup: {}", path.display());
    }
    if let Some(error) = simulation.error() {
        println!("  Error: {}", error);
    }
}

fn cmd_run(
    model: &Path,
    weather: &Path,
    name: Option<String>,
    common: &CommonArgs,
    backup: Option<BackupStrategy>,
    mismatch: Option<VersionMismatchAction>,
) -> AppResult<()> {
    let cancel = install_interrupt_handler()?;
    let runner = build_runner(common, &cancel)?;
    let options = RunOptions {
        name: name.map(SimulationName::new).transpose()?,
        backup_strategy: backup,
        version_mismatch_action: mismatch,
        idd_file: None,
    };

    println!("Running simulation: {}", model.display());
    match runner.try_run_one(model, weather, &options) {
        Ok(simulation) => {
            println!("✓ Simulation completed: {}", simulation.name());
            print_summary(&simulation);
            if let Some(path) = &common.json {
                write_json(path, &simulation)?;
            }
            Ok(())
        }
        Err(failure) => {
            println!("✗ Simulation {}: {}", failure.simulation.status(), failure.simulation.name());
            print_summary(&failure.simulation);
            if let Some(path) = &common.json {
                write_json(path, &failure.simulation)?;
            }
            Err(failure.error)
        }
    }
}

fn load_manifest(path: &Path) -> AppResult<BTreeMap<String, ManifestEntry>> {
    let content = fs::read_to_string(path).map_err(|e| AppError::ConfigFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| AppError::Batch(format!("Failed to parse manifest YAML: {}", e)))
}

fn cmd_batch(manifest: &Path, weather: Option<&Path>, common: &CommonArgs) -> AppResult<()> {
    let entries = load_manifest(manifest)?;
    let base = manifest.parent().unwrap_or(Path::new("."));
    let samples: BTreeMap<String, Sample> = entries
        .into_iter()
        .map(|(key, entry)| {
            let sample = Sample::new(base.join(entry.model));
            let sample = match entry.weather {
                Some(weather) => sample.with_weather(base.join(weather)),
                None => sample,
            };
            (key, sample)
        })
        .collect();

    let cancel = install_interrupt_handler()?;
    let runner = build_runner(common, &cancel)?;

    println!("Running {} simulations", samples.len());
    let results = runner.run_many(samples, weather)?;

    let mut failed = 0usize;
    for (key, simulation) in &results {
        let mark = if simulation.status() == ep_app::RunStatus::Finished {
            "✓"
        } else {
            failed += 1;
            "✗"
        };
        println!("{} {}: {}", mark, key, simulation.status());
        if let Some(error) = simulation.error() {
            println!("    {}", error);
        }
    }
    println!("{} finished, {} failed", results.len() - failed, failed);

    if let Some(path) = &common.json {
        write_json(path, &results)?;
    }
    Ok(())
}

fn cmd_backups(dir: &Path) -> AppResult<()> {
    let store = BackupStore::new(dir);
    let backups = store.list_backups()?;
    if backups.is_empty() {
        println!("No backups in {}", dir.display());
        return Ok(());
    }
    println!("Backups in {}:", dir.display());
    for manifest in backups {
        println!(
            "  {}  {}  {} files",
            manifest.dir_name,
            manifest.timestamp,
            manifest.files.len()
        );
    }
    Ok(())
}
