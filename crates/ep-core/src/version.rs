//! Model / engine version compatibility.
//!
//! Versions are compared as `major.minor` strings (e.g. `"8.7"`).

use core::fmt;
use core::str::FromStr;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{CoreError, CoreResult};

static MODEL_COMMENT_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EnergyPlus Version (\d+\.\d+)").expect("valid regex"));
static MODEL_OBJECT_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bVersion\s*,\s*(\d+\.\d+)").expect("valid regex"));
static IDD_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IDD_Version (\d+\.\d+)").expect("valid regex"));
static ENGINE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"EnergyPlus, Version (\d+\.\d+)").expect("valid regex"));

/// What to do when the model and engine versions differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionMismatchAction {
    #[default]
    Raise,
    Warn,
    Ignore,
}

impl VersionMismatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionMismatchAction::Raise => "raise",
            VersionMismatchAction::Warn => "warn",
            VersionMismatchAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for VersionMismatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionMismatchAction {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" => Ok(VersionMismatchAction::Raise),
            "warn" => Ok(VersionMismatchAction::Warn),
            "ignore" => Ok(VersionMismatchAction::Ignore),
            _ => Err(CoreError::UnknownAction(s.to_string())),
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Version declared by a model (IDF) file.
pub fn model_version(model_text: &str) -> Option<String> {
    first_capture(&MODEL_COMMENT_VERSION, model_text)
        .or_else(|| first_capture(&MODEL_OBJECT_VERSION, model_text))
}

/// Version declared by an engine definition (IDD) file.
pub fn idd_version(idd_text: &str) -> Option<String> {
    first_capture(&IDD_VERSION, idd_text)
}

/// Version reported by `energyplus -v`.
pub fn engine_version_from_output(output: &str) -> Option<String> {
    first_capture(&ENGINE_VERSION, output)
}

/// Compare versions and apply `action` on mismatch.
///
/// Returns `Ok(true)` when the versions match, `Ok(false)` on a tolerated
/// mismatch. A model without a detectable version is a mismatch.
pub fn check_version_compat(
    model: Option<&str>,
    engine: &str,
    action: VersionMismatchAction,
) -> CoreResult<bool> {
    if model == Some(engine) {
        return Ok(true);
    }

    let model = model.unwrap_or("unknown").to_string();
    match action {
        VersionMismatchAction::Raise => Err(CoreError::VersionMismatch {
            model,
            engine: engine.to_string(),
        }),
        VersionMismatchAction::Warn => {
            tracing::warn!(
                model_version = %model,
                engine_version = %engine,
                "model and EnergyPlus versions do not match"
            );
            Ok(false)
        }
        VersionMismatchAction::Ignore => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_version_object() {
        let idf = "! generated\n  Version,\n    8.4;                     !- Version Identifier\n";
        assert_eq!(model_version(idf).as_deref(), Some("8.4"));
    }

    #[test]
    fn reads_version_comment() {
        let idf = "!-Option OriginalOrderTop\n!- EnergyPlus Version 8.7\nVersion,8.7;";
        assert_eq!(model_version(idf).as_deref(), Some("8.7"));
    }

    #[test]
    fn reads_idd_and_engine_versions() {
        assert_eq!(
            idd_version("!IDD_Version 8.7.0\n!IDD_BUILD 78a111df4a").as_deref(),
            Some("8.7")
        );
        assert_eq!(
            engine_version_from_output("EnergyPlus, Version 8.7.0-78a111df4a, YMD=2017.03.21")
                .as_deref(),
            Some("8.7")
        );
        assert_eq!(engine_version_from_output("command not found"), None);
    }

    #[test]
    fn raise_names_both_versions() {
        let err = check_version_compat(Some("8.4"), "8.7", VersionMismatchAction::Raise)
            .unwrap_err()
            .to_string();
        assert!(err.contains("8.4"));
        assert!(err.contains("8.7"));
    }

    #[test]
    fn warn_and_ignore_proceed() {
        assert!(!check_version_compat(Some("8.4"), "8.7", VersionMismatchAction::Warn).unwrap());
        assert!(!check_version_compat(None, "8.7", VersionMismatchAction::Ignore).unwrap());
        assert!(check_version_compat(Some("8.7"), "8.7", VersionMismatchAction::Raise).unwrap());
    }

    #[test]
    fn parses_action() {
        assert_eq!(
            "WARN".parse::<VersionMismatchAction>().unwrap(),
            VersionMismatchAction::Warn
        );
        assert!("explode".parse::<VersionMismatchAction>().is_err());
    }
}
