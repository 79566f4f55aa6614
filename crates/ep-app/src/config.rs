//! Runner configuration and engine discovery.

use ep_core::VersionMismatchAction;
use ep_install::InstallConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::simulation::BackupStrategy;

/// Environment variable naming an EnergyPlus install directory.
pub const EPLUS_DIR_ENV: &str = "EPLUS_DIR";

const BINARY_NAMES: [&str; 4] = ["energyplus", "EnergyPlus", "energyplus.exe", "EnergyPlus.exe"];
const IDD_FILE_NAME: &str = "Energy+.idd";

/// How the engine is launched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineKind {
    /// `binary`, or the executable found under `energyplus_root`.
    #[default]
    Local,
    /// `docker run <image>:<tag> energyplus ...` with the working directory mounted.
    Docker { image: String, tag: String },
}

/// Options shared by every run of an `EPlusRunner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// EnergyPlus install directory (binary + `Energy+.idd`). Local runs need
    /// either this or `binary`.
    pub energyplus_root: Option<PathBuf>,
    /// Parent of the per-run working directories; the OS temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    /// Engine executable, overriding the lookup under `energyplus_root`.
    pub binary: Option<PathBuf>,
    /// Engine definition file, overriding `<energyplus_root>/Energy+.idd`.
    pub idd_file: Option<PathBuf>,
    pub engine: EngineKind,
    pub output_prefix: String,
    pub readvars: bool,
    pub expand_objects: bool,
    pub extra_args: Vec<String>,
    pub backup_strategy: BackupStrategy,
    pub backup_dir: PathBuf,
    pub version_mismatch_action: VersionMismatchAction,
    /// Worker threads for batches; available parallelism when unset.
    pub workers: Option<usize>,
    /// Kill the engine after this many seconds. No limit when unset.
    pub timeout_s: Option<f64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            energyplus_root: None,
            temp_dir: None,
            binary: None,
            idd_file: None,
            engine: EngineKind::Local,
            output_prefix: "eplus".to_string(),
            readvars: true,
            expand_objects: true,
            extra_args: Vec::new(),
            backup_strategy: BackupStrategy::OnError,
            backup_dir: PathBuf::from("./backup"),
            version_mismatch_action: VersionMismatchAction::Raise,
            workers: None,
            timeout_s: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.energyplus_root = Some(root.into());
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn timeout(&self) -> AppResult<Option<std::time::Duration>> {
        match self.timeout_s {
            None => Ok(None),
            Some(s) if s.is_finite() && s > 0.0 => std::time::Duration::try_from_secs_f64(s)
                .map(Some)
                .map_err(|e| AppError::Config(format!("timeout_s {} is out of range: {}", s, e))),
            Some(s) => Err(AppError::Config(format!(
                "timeout_s must be a positive number of seconds, got {}",
                s
            ))),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.output_prefix.is_empty() || self.output_prefix.contains(['/', '\\']) {
            return Err(AppError::Config(format!(
                "invalid output prefix {:?}",
                self.output_prefix
            )));
        }
        if let EngineKind::Docker { image, tag } = &self.engine {
            if image.is_empty() || tag.is_empty() {
                return Err(AppError::Config(
                    "docker engine needs both an image and a tag".to_string(),
                ));
            }
        }
        self.timeout()?;
        Ok(())
    }
}

/// Load a runner config from a YAML file.
pub fn load_config(path: &Path) -> AppResult<RunnerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::ConfigFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: RunnerConfig = serde_yaml::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse config YAML: {}", e)))?;
    config.validate()?;

    Ok(config)
}

/// Save a runner config to a YAML file.
pub fn save_config(path: &Path, config: &RunnerConfig) -> AppResult<()> {
    let content = serde_yaml::to_string(config)
        .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, content).map_err(|e| AppError::ConfigFileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// An EnergyPlus install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergyPlusRoot {
    root: PathBuf,
}

impl EnergyPlusRoot {
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(AppError::InputValidation {
                role: "EnergyPlus root directory",
                path: root,
            });
        }
        Ok(Self { root })
    }

    /// Explicit root first, then the value of `EPLUS_DIR` supplied by the caller.
    pub fn discover(explicit: Option<&Path>, eplus_dir_env: Option<&str>) -> AppResult<Self> {
        if let Some(root) = explicit {
            return Self::new(root);
        }
        match eplus_dir_env.filter(|v| !v.is_empty()) {
            Some(dir) => Self::new(dir),
            None => Err(AppError::Config(format!(
                "no EnergyPlus root given and {} is not set",
                EPLUS_DIR_ENV
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn binary(&self) -> AppResult<PathBuf> {
        BINARY_NAMES
            .iter()
            .map(|name| self.root.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| AppError::InputValidation {
                role: "EnergyPlus executable",
                path: self.root.join(BINARY_NAMES[0]),
            })
    }

    pub fn idd_file(&self) -> PathBuf {
        self.root.join(IDD_FILE_NAME)
    }
}

/// Install (if needed) the release behind `url` and return its root.
pub fn install_energyplus(url: &str, config: &InstallConfig) -> AppResult<EnergyPlusRoot> {
    let root = ep_install::ensure_energyplus_root(url, config)?;
    EnergyPlusRoot::new(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.output_prefix, "eplus");
        assert_eq!(config.backup_strategy, BackupStrategy::OnError);
        assert_eq!(config.version_mismatch_action, VersionMismatchAction::Raise);
        assert!(config.worker_count() >= 1);
        assert_eq!(config.timeout().unwrap(), None);
    }

    #[test]
    fn yaml_round_trip_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.yaml");
        std::fs::write(
            &path,
            "engine:\n  kind: docker\n  image: nrel/energyplus\n  tag: 8.4.0\nbackup_strategy: always\nworkers: 2\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.engine,
            EngineKind::Docker {
                image: "nrel/energyplus".to_string(),
                tag: "8.4.0".to_string()
            }
        );
        assert_eq!(config.backup_strategy, BackupStrategy::Always);
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.output_prefix, "eplus");

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn explicit_binary_and_idd_paths_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.yaml");
        std::fs::write(
            &path,
            "binary: /opt/ep/energyplus\nidd_file: /opt/ep/custom.idd\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.engine, EngineKind::Local);
        assert_eq!(config.binary, Some(PathBuf::from("/opt/ep/energyplus")));
        assert_eq!(config.idd_file, Some(PathBuf::from("/opt/ep/custom.idd")));
        assert!(config.energyplus_root.is_none());
    }

    #[test]
    fn oversized_timeout_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.yaml");
        std::fs::write(&path, "timeout_s: 1.0e20\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn rejects_bad_timeout_and_prefix() {
        let mut config = RunnerConfig {
            timeout_s: Some(-1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.timeout_s = None;
        config.output_prefix = "a/b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn discovery_prefers_explicit_root() {
        let explicit = tempfile::tempdir().unwrap();
        let env = tempfile::tempdir().unwrap();
        let root = EnergyPlusRoot::discover(
            Some(explicit.path()),
            env.path().to_str(),
        )
        .unwrap();
        assert_eq!(root.path(), explicit.path());

        let root = EnergyPlusRoot::discover(None, env.path().to_str()).unwrap();
        assert_eq!(root.path(), env.path());

        assert!(EnergyPlusRoot::discover(None, None).is_err());
    }

    #[test]
    fn missing_binary_is_input_validation() {
        let dir = tempfile::tempdir().unwrap();
        let root = EnergyPlusRoot::new(dir.path()).unwrap();
        assert!(matches!(
            root.binary(),
            Err(AppError::InputValidation { .. })
        ));
    }
}
