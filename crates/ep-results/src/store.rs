//! Backup storage for run working directories.
//!
//! Layout under the store root:
//!
//! ```text
//! <status>_<name>/                 complete copy of the working directory
//! <status>_<name>.manifest.json    what was archived, and when
//! ```

use chrono::Utc;
use ep_core::{RunStatus, SimulationName};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{ResultsError, ResultsResult};

const MANIFEST_SUFFIX: &str = ".manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub dir_name: String,
    pub name: String,
    pub status: RunStatus,
    pub timestamp: String,
    pub source_dir: PathBuf,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root_dir: PathBuf,
}

impl BackupStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn dir_name(status: RunStatus, name: &SimulationName) -> String {
        format!("{}_{}", status, name)
    }

    pub fn backup_dir(&self, status: RunStatus, name: &SimulationName) -> PathBuf {
        self.root_dir.join(Self::dir_name(status, name))
    }

    fn manifest_path(&self, dir_name: &str) -> PathBuf {
        self.root_dir.join(format!("{}{}", dir_name, MANIFEST_SUFFIX))
    }

    pub fn has_backup(&self, status: RunStatus, name: &SimulationName) -> bool {
        self.backup_dir(status, name).is_dir()
    }

    /// Copy `working_dir` to `<root>/<status>_<name>`, replacing any previous
    /// backup at that destination.
    pub fn backup(
        &self,
        working_dir: &Path,
        status: RunStatus,
        name: &SimulationName,
    ) -> ResultsResult<PathBuf> {
        if !working_dir.is_dir() {
            return Err(ResultsError::MissingSource {
                path: working_dir.to_path_buf(),
            });
        }

        let dir_name = Self::dir_name(status, name);
        let dest = self.root_dir.join(&dir_name);
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        fs::create_dir_all(&self.root_dir)?;

        let mut files = copy_tree(working_dir, &dest)?;
        files.sort();

        let manifest = BackupManifest {
            dir_name: dir_name.clone(),
            name: name.to_string(),
            status,
            timestamp: Utc::now().to_rfc3339(),
            source_dir: working_dir.to_path_buf(),
            files,
        };
        fs::write(
            self.manifest_path(&dir_name),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        tracing::info!(
            source = %working_dir.display(),
            dest = %dest.display(),
            "backed up working directory"
        );
        Ok(dest)
    }

    pub fn load_manifest(&self, dir_name: &str) -> ResultsResult<BackupManifest> {
        let path = self.manifest_path(dir_name);
        if !path.exists() {
            return Err(ResultsError::BackupNotFound {
                dir_name: dir_name.to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn list_backups(&self) -> ResultsResult<Vec<BackupManifest>> {
        let mut backups = Vec::new();
        if !self.root_dir.exists() {
            return Ok(backups);
        }

        for entry in fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(dir_name) = file_name.strip_suffix(MANIFEST_SUFFIX) {
                if let Ok(manifest) = self.load_manifest(dir_name) {
                    backups.push(manifest);
                }
            }
        }

        backups.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(backups)
    }

    pub fn delete_backup(&self, dir_name: &str) -> ResultsResult<()> {
        let dir = self.root_dir.join(dir_name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        let manifest = self.manifest_path(dir_name);
        if manifest.exists() {
            fs::remove_file(manifest)?;
        }
        Ok(())
    }
}

fn relative_name(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

/// Copy `src` into `dest`, following links. Returns the copied files relative to `src`.
///
/// Links that cannot be followed (dangling, or looping back to an ancestor)
/// are recreated as links on unix and skipped elsewhere.
fn copy_tree(src: &Path, dest: &Path) -> ResultsResult<Vec<String>> {
    fs::create_dir_all(dest)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let Some(link) = err.path().map(Path::to_path_buf) else {
                    return Err(err.into());
                };
                let is_link = fs::symlink_metadata(&link)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                let Ok(rel) = link.strip_prefix(src) else {
                    return Err(err.into());
                };
                if !is_link {
                    return Err(err.into());
                }
                if relink(&link, &dest.join(rel))? {
                    files.push(relative_name(rel));
                }
                tracing::warn!(path = %link.display(), error = %err, "link not followed in backup");
                continue;
            }
        };

        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            files.push(relative_name(rel));
        }
    }
    Ok(files)
}

#[cfg(unix)]
fn relink(link: &Path, target: &Path) -> ResultsResult<bool> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(true)
}

#[cfg(not(unix))]
fn relink(_link: &Path, _target: &Path) -> ResultsResult<bool> {
    Ok(false)
}
