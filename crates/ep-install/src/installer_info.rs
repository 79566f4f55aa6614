//! Installer URL parsing.

use regex::Regex;
use std::sync::LazyLock;

use crate::{InstallError, InstallResult};

static INSTALLER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r".*?(?P<filename>EnergyPlus-(?P<version>\d+\.\d+\.\d+)-(?P<revision>\w+)-(?P<platform>.*?)\.sh)$",
    )
    .expect("valid regex")
});

/// What an installer URL tells us about the release it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerInfo {
    pub filename: String,
    pub version: String,
    pub revision: String,
    pub platform: String,
}

impl InstallerInfo {
    pub fn from_url(url: &str) -> InstallResult<Self> {
        let caps = INSTALLER_PATTERN
            .captures(url)
            .ok_or_else(|| InstallError::InvalidUrl(url.to_string()))?;
        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default();
        Ok(Self {
            filename: group("filename"),
            version: group("version"),
            revision: group("revision"),
            platform: group("platform"),
        })
    }

    /// Directory the installer creates inside the install root, e.g. `EnergyPlus-8-7-0`.
    pub fn install_dir_name(&self) -> String {
        format!("EnergyPlus-{}", self.version.replace('.', "-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_release_url() {
        let info = InstallerInfo::from_url(
            "https://github.com/NREL/EnergyPlus/releases/download/v8.7.0/EnergyPlus-8.7.0-78a111df4a-Linux-x86_64.sh",
        )
        .unwrap();
        assert_eq!(info.filename, "EnergyPlus-8.7.0-78a111df4a-Linux-x86_64.sh");
        assert_eq!(info.version, "8.7.0");
        assert_eq!(info.revision, "78a111df4a");
        assert_eq!(info.platform, "Linux-x86_64");
        assert_eq!(info.install_dir_name(), "EnergyPlus-8-7-0");
    }

    #[test]
    fn rejects_non_installer_url() {
        assert!(InstallerInfo::from_url("https://energyplus.net/downloads").is_err());
    }
}
