//! Input validation and per-run working directories.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::{AppError, AppResult};

/// File name used when the model is given as in-memory text.
pub const INLINE_MODEL_NAME: &str = "model.idf";

const WORKING_DIR_PREFIX: &str = "energyplus_run_";

/// Where the model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    File(PathBuf),
    /// Model text generated by the caller.
    Content(String),
}

impl ModelSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ModelSource::File(path.into())
    }

    pub fn content(text: impl Into<String>) -> Self {
        ModelSource::Content(text.into())
    }

    /// Path recorded on the simulation record.
    pub fn display_path(&self) -> PathBuf {
        match self {
            ModelSource::File(path) => path.clone(),
            ModelSource::Content(_) => PathBuf::from(INLINE_MODEL_NAME),
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        ModelSource::File(path)
    }
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        ModelSource::File(path.to_path_buf())
    }
}

pub(crate) fn require_file(role: &'static str, path: &Path) -> AppResult<()> {
    tracing::debug!(role, path = %path.display(), "checking input");
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::InputValidation {
            role,
            path: path.to_path_buf(),
        })
    }
}

/// Fail fast on missing inputs, before anything is spawned.
pub fn validate_inputs(model: &ModelSource, weather: &Path, idd: Option<&Path>) -> AppResult<()> {
    if let ModelSource::File(path) = model {
        require_file("Model file", path)?;
    }
    require_file("Weather file", weather)?;
    if let Some(idd) = idd {
        require_file("Engine definition file", idd)?;
    }
    Ok(())
}

/// A fresh `energyplus_run_*` directory owned by one run.
///
/// `finalize` consumes the guard, so a directory is released exactly once.
/// Dropping it without finalizing also removes it.
#[derive(Debug)]
pub struct WorkingDir {
    dir: TempDir,
}

impl WorkingDir {
    pub fn create(temp_root: Option<&Path>) -> AppResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKING_DIR_PREFIX);
        let dir = match temp_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        tracing::debug!(dir = %dir.path().display(), "working directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn finalize(self) -> AppResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(dir = %path.display(), "working directory removed");
        Ok(())
    }
}

/// Names of the inputs inside the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInputs {
    pub model: PathBuf,
    pub weather: PathBuf,
    pub idd: Option<PathBuf>,
}

fn copy_into(dir: &Path, src: &Path) -> AppResult<PathBuf> {
    let name = src.file_name().ok_or_else(|| AppError::InputValidation {
        role: "File name",
        path: src.to_path_buf(),
    })?;
    let dest = dir.join(name);
    fs::copy(src, &dest)?;
    Ok(PathBuf::from(name))
}

/// Copy (or write) the inputs into `working_dir`.
pub fn stage(
    working_dir: &WorkingDir,
    model: &ModelSource,
    weather: &Path,
    idd: Option<&Path>,
) -> AppResult<StagedInputs> {
    let dir = working_dir.path();

    let model = match model {
        ModelSource::File(path) => copy_into(dir, path)?,
        ModelSource::Content(text) => {
            fs::write(dir.join(INLINE_MODEL_NAME), text)?;
            PathBuf::from(INLINE_MODEL_NAME)
        }
    };
    let weather = copy_into(dir, weather)?;
    let idd = idd.map(|p| copy_into(dir, p)).transpose()?;

    Ok(StagedInputs {
        model,
        weather,
        idd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_inputs_name_their_role() {
        let dir = tempfile::tempdir().unwrap();
        let weather = dir.path().join("in.epw");
        fs::write(&weather, "LOCATION").unwrap();

        let err = validate_inputs(
            &ModelSource::file(dir.path().join("missing.idf")),
            &weather,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Model file not found"));

        let err = validate_inputs(
            &ModelSource::content("Version,8.7;"),
            &weather,
            Some(&dir.path().join("Energy+.idd")),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Engine definition file not found"));
    }

    #[test]
    fn stages_files_and_inline_model() {
        let src = tempfile::tempdir().unwrap();
        let weather = src.path().join("in.epw");
        fs::write(&weather, "LOCATION").unwrap();

        let wd = WorkingDir::create(Some(&src.path().join("runs"))).unwrap();
        let staged = stage(&wd, &ModelSource::content("Version,8.7;"), &weather, None).unwrap();
        assert_eq!(staged.model, PathBuf::from(INLINE_MODEL_NAME));
        assert_eq!(
            fs::read_to_string(wd.path().join(&staged.weather)).unwrap(),
            "LOCATION"
        );
        assert!(
            wd.path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(WORKING_DIR_PREFIX)
        );

        let path = wd.path().to_path_buf();
        wd.finalize().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn working_dirs_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let a = WorkingDir::create(Some(root.path())).unwrap();
        let b = WorkingDir::create(Some(root.path())).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
