//! ep-install: on-demand EnergyPlus installation.
//!
//! `ensure_energyplus_root` downloads a Linux `.sh` installer, plays its
//! license/directory/symlink prompts and returns the install directory. The
//! install root is shared between processes; first-time installation is
//! serialized by an advisory lock file, later lookups do not take it.

pub mod download;
pub mod driver;
pub mod installer_info;
pub mod lock;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use download::download_installer;
pub use driver::{ScriptedDriver, Step};
pub use installer_info::InstallerInfo;
pub use lock::InstallLock;

pub const APP_DIR_NAME: &str = "energyplus_wrapper";

pub type InstallResult<T> = Result<T, InstallError>;

#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("Your system ({0}) is not supported yet; install EnergyPlus yourself")]
    UnsupportedPlatform(String),

    #[error("Not an EnergyPlus installer URL: {0}")]
    InvalidUrl(String),

    #[error("URL is not a downloadable file: {url} (content type {content_type:?})")]
    NotDownloadable { url: String, content_type: String },

    #[error("Installer exited with code {code:?}")]
    InstallerFailed { code: Option<i32>, output: String },

    #[error("Installer finished but {path} is missing or empty")]
    InstallMissing { path: PathBuf },

    #[error("Could not determine a default install root (no XDG_DATA_HOME or HOME)")]
    NoInstallRoot,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and how to install.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Releases are installed as `<install_root>/EnergyPlus-x-y-z/`.
    pub install_root: PathBuf,
    /// Where installers are downloaded; a temporary directory when `None`.
    pub installer_cache: Option<PathBuf>,
    /// How long to wait for each installer prompt.
    pub prompt_timeout: Duration,
}

impl InstallConfig {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            installer_cache: None,
            prompt_timeout: Duration::from_secs(30),
        }
    }

    /// Config rooted at the per-user data directory.
    pub fn user_default() -> InstallResult<Self> {
        let xdg = std::env::var("XDG_DATA_HOME").ok();
        let home = std::env::var("HOME").ok();
        default_install_root(xdg.as_deref(), home.as_deref())
            .map(Self::new)
            .ok_or(InstallError::NoInstallRoot)
    }
}

/// `$XDG_DATA_HOME/energyplus_wrapper`, else `$HOME/.local/share/energyplus_wrapper`.
pub fn default_install_root(xdg_data_home: Option<&str>, home: Option<&str>) -> Option<PathBuf> {
    if let Some(xdg) = xdg_data_home.filter(|v| !v.is_empty()) {
        return Some(Path::new(xdg).join(APP_DIR_NAME));
    }
    home.filter(|v| !v.is_empty())
        .map(|h| Path::new(h).join(".local").join("share").join(APP_DIR_NAME))
}

fn is_installed(dir: &Path) -> bool {
    dir.is_dir()
        && fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

/// Prompt sequence of the Linux `.sh` installers: accept the license, choose
/// the install directory, decline symlinks.
pub fn installer_steps(install_root: &Path) -> Vec<Step> {
    vec![
        Step::Expect("\n".to_string()),
        Step::Send("y".to_string()),
        Step::Send(install_root.to_string_lossy().into_owned()),
        Step::Expect("\n".to_string()),
        Step::Send("n".to_string()),
        Step::ExpectEof,
    ]
}

fn run_installer(script: &Path, config: &InstallConfig) -> InstallResult<()> {
    tracing::info!(script = %script.display(), root = %config.install_root.display(), "running EnergyPlus installer");
    let transcript = ScriptedDriver::new("bash")
        .arg(script.as_os_str())
        .timeout(config.prompt_timeout)
        .run(&installer_steps(&config.install_root))?;
    tracing::debug!(transcript = %transcript, "installer finished");
    Ok(())
}

fn obtain_and_install(url: &str, info: &InstallerInfo, config: &InstallConfig) -> InstallResult<()> {
    match &config.installer_cache {
        Some(cache) => {
            fs::create_dir_all(cache)?;
            let script = cache.join(&info.filename);
            if !script.exists() {
                download_installer(url, &script)?;
            }
            run_installer(&script, config)
        }
        None => {
            let scratch = tempfile::tempdir()?;
            let script = scratch.path().join(&info.filename);
            download_installer(url, &script)?;
            run_installer(&script, config)
        }
    }
}

/// Return the EnergyPlus directory for the release behind `url`, installing it
/// first if needed. Linux only.
pub fn ensure_energyplus_root(url: &str, config: &InstallConfig) -> InstallResult<PathBuf> {
    if !cfg!(target_os = "linux") {
        return Err(InstallError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ));
    }

    let info = InstallerInfo::from_url(url)?;
    let expected = config.install_root.join(info.install_dir_name());
    if is_installed(&expected) {
        return Ok(expected);
    }

    let _lock = InstallLock::acquire(&config.install_root)?;
    if is_installed(&expected) {
        tracing::debug!(dir = %expected.display(), "installed by a concurrent process");
        return Ok(expected);
    }
    if expected.exists() {
        fs::remove_dir_all(&expected)?;
    }

    obtain_and_install(url, &info, config)?;

    if !is_installed(&expected) {
        return Err(InstallError::InstallMissing { path: expected });
    }
    tracing::info!(dir = %expected.display(), version = %info.version, "EnergyPlus installed");
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_prefers_xdg() {
        assert_eq!(
            default_install_root(Some("/data"), Some("/home/u")),
            Some(PathBuf::from("/data/energyplus_wrapper"))
        );
        assert_eq!(
            default_install_root(Some(""), Some("/home/u")),
            Some(PathBuf::from("/home/u/.local/share/energyplus_wrapper"))
        );
        assert_eq!(default_install_root(None, None), None);
    }

    #[test]
    fn steps_answer_three_prompts() {
        let sends: Vec<_> = installer_steps(Path::new("/opt/ep"))
            .into_iter()
            .filter_map(|s| match s {
                Step::Send(line) => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(sends, vec!["y", "/opt/ep", "n"]);
    }
}
