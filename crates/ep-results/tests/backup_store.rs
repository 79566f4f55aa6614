use std::fs;
use std::path::Path;

use ep_core::{RunStatus, SimulationName};
use ep_results::BackupStore;
use walkdir::WalkDir;

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .to_string();
            (rel, fs::read(entry.path()).unwrap())
        })
        .collect();
    out.sort();
    out
}

fn working_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("failed to create working dir");
    fs::write(dir.path().join("in.idf"), "Version,8.7;").unwrap();
    fs::write(dir.path().join("eplus.err"), "** Severe  ** boom").unwrap();
    fs::create_dir_all(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("eplus.csv"), "a\n1\n").unwrap();
    dir
}

#[test]
fn backup_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let store = BackupStore::new(root.path().join("backup"));
    let wd = working_dir();
    let name = SimulationName::new("sim-1").unwrap();

    let first = store.backup(wd.path(), RunStatus::Failed, &name).unwrap();
    let once = snapshot(&first);

    let second = store.backup(wd.path(), RunStatus::Failed, &name).unwrap();
    assert_eq!(first, second);
    assert_eq!(snapshot(&second), once);
    assert_eq!(once, snapshot(wd.path()));
    assert!(first.ends_with("failed_sim-1"));
}

#[test]
fn backup_replaces_stale_content() {
    let root = tempfile::tempdir().unwrap();
    let store = BackupStore::new(root.path());
    let name = SimulationName::new("sim-2").unwrap();

    let dest = store.backup_dir(RunStatus::Failed, &name);
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("stale.txt"), "old").unwrap();

    let wd = working_dir();
    store.backup(wd.path(), RunStatus::Failed, &name).unwrap();
    assert!(!dest.join("stale.txt").exists());
    assert!(dest.join("sub").join("eplus.csv").exists());
}

#[test]
fn manifests_list_and_delete() {
    let root = tempfile::tempdir().unwrap();
    let store = BackupStore::new(root.path());
    let wd = working_dir();

    let a = SimulationName::new("a").unwrap();
    let b = SimulationName::new("b").unwrap();
    store.backup(wd.path(), RunStatus::Finished, &a).unwrap();
    store.backup(wd.path(), RunStatus::Interrupted, &b).unwrap();

    let backups = store.list_backups().unwrap();
    assert_eq!(backups.len(), 2);
    assert_eq!(backups[0].dir_name, "finished_a");
    assert_eq!(backups[1].status, RunStatus::Interrupted);
    assert!(backups[0].files.contains(&"sub/eplus.csv".to_string()));

    store.delete_backup("finished_a").unwrap();
    assert!(!store.has_backup(RunStatus::Finished, &a));
    assert!(store.load_manifest("finished_a").is_err());
    assert_eq!(store.list_backups().unwrap().len(), 1);
}

#[cfg(unix)]
#[test]
fn backup_follows_links_and_keeps_dangling_ones() {
    use std::os::unix::fs::symlink;

    let outside = tempfile::tempdir().unwrap();
    fs::create_dir_all(outside.path().join("reports")).unwrap();
    fs::write(outside.path().join("reports").join("eplus.err"), "** Severe  ** boom").unwrap();
    fs::write(outside.path().join("eplus.eso"), "1,5,Environment").unwrap();

    let wd = working_dir();
    symlink(outside.path().join("reports"), wd.path().join("reports")).unwrap();
    symlink(outside.path().join("eplus.eso"), wd.path().join("eplus.eso")).unwrap();
    symlink(wd.path().join("gone.txt"), wd.path().join("dangling.txt")).unwrap();

    let root = tempfile::tempdir().unwrap();
    let store = BackupStore::new(root.path());
    let name = SimulationName::new("linked").unwrap();
    let dest = store.backup(wd.path(), RunStatus::Failed, &name).unwrap();

    let err = dest.join("reports").join("eplus.err");
    assert!(err.is_file());
    assert!(!fs::symlink_metadata(dest.join("reports")).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_to_string(err).unwrap(), "** Severe  ** boom");
    assert_eq!(fs::read_to_string(dest.join("eplus.eso")).unwrap(), "1,5,Environment");
    assert!(
        fs::symlink_metadata(dest.join("dangling.txt"))
            .unwrap()
            .file_type()
            .is_symlink()
    );

    let manifest = store.load_manifest("failed_linked").unwrap();
    assert!(manifest.files.contains(&"reports/eplus.err".to_string()));
    assert!(manifest.files.contains(&"in.idf".to_string()));
}
