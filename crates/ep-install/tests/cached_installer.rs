#![cfg(target_os = "linux")]

use std::fs;
use std::time::Duration;

use ep_install::{InstallConfig, InstallError, ensure_energyplus_root};

const URL: &str = "https://github.com/NREL/EnergyPlus/releases/download/v8.7.0/EnergyPlus-8.7.0-78a111df4a-Linux-x86_64.sh";
const FILENAME: &str = "EnergyPlus-8.7.0-78a111df4a-Linux-x86_64.sh";

// Mimics the release installer: license prompt, install dir, symlink prompt.
const FAKE_INSTALLER: &str = r#"
echo "Do you accept the license? [yN]:"
read -r accept
read -r dir
read -r link
if [ "$accept" != "y" ]; then
  echo "license declined" >&2
  exit 1
fi
mkdir -p "$dir/EnergyPlus-8-7-0"
printf '#!/bin/sh\necho "EnergyPlus, Version 8.7.0-78a111df4a"\n' > "$dir/EnergyPlus-8-7-0/energyplus"
echo "!IDD_Version 8.7.0" > "$dir/EnergyPlus-8-7-0/Energy+.idd"
echo "$link" > "$dir/EnergyPlus-8-7-0/symlink_answer"
"#;

fn config(root: &std::path::Path, cache: &std::path::Path) -> InstallConfig {
    InstallConfig {
        install_root: root.to_path_buf(),
        installer_cache: Some(cache.to_path_buf()),
        prompt_timeout: Duration::from_millis(200),
    }
}

#[test]
fn installs_from_cached_script_once() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let cache = tmp.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join(FILENAME), FAKE_INSTALLER).unwrap();

    let installed = ensure_energyplus_root(URL, &config(&root, &cache)).unwrap();
    assert_eq!(installed, root.join("EnergyPlus-8-7-0"));
    assert!(installed.join("energyplus").exists());
    assert_eq!(
        fs::read_to_string(installed.join("symlink_answer")).unwrap().trim(),
        "n"
    );

    // Second call hits the fast path even without the installer.
    fs::remove_file(cache.join(FILENAME)).unwrap();
    let again = ensure_energyplus_root(URL, &config(&root, &cache)).unwrap();
    assert_eq!(again, installed);
}

#[test]
fn broken_installer_surfaces_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let cache = tmp.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join(FILENAME), "echo broken; exit 7\n").unwrap();

    let err = ensure_energyplus_root(URL, &config(&root, &cache)).unwrap_err();
    assert!(matches!(err, InstallError::InstallerFailed { code: Some(7), .. }));
}

#[test]
fn rejects_unparseable_url() {
    let tmp = tempfile::tempdir().unwrap();
    let err = ensure_energyplus_root(
        "https://example.com/installer.zip",
        &config(tmp.path(), tmp.path()),
    )
    .unwrap_err();
    assert!(matches!(err, InstallError::InvalidUrl(_)));
}
