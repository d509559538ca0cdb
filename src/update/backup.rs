//! Installation snapshots taken before an update is applied

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Entry names never copied into a backup, at any depth
pub const BACKUP_EXCLUDES: &[&str] = &[
    "backups",
    "temp",
    "update_temp",
    ".cache",
    "target",
    ".agent_identity",
    "update_package.zip",
];

fn is_excluded(name: &str) -> bool {
    BACKUP_EXCLUDES.contains(&name)
}

/// Directory name for a backup of `version`
fn backup_name(version: &str) -> String {
    let safe: String = version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("agent_backup_{safe}")
}

/// Snapshot `agent_dir` into `backup_root/agent_backup_<version>`
///
/// A backup that already exists for this version is left untouched. The copy
/// is built under a hidden name and renamed into place once complete.
pub fn create_backup(agent_dir: &Path, backup_root: &Path, version: &str) -> Result<PathBuf> {
    let name = backup_name(version);
    let target = backup_root.join(&name);
    if target.exists() {
        info!("[UPDATE] Backup {} already exists, keeping it", target.display());
        return Ok(target);
    }

    let partial = backup_root.join(format!(".partial_{name}"));
    if partial.exists() {
        fs::remove_dir_all(&partial)
            .with_context(|| format!("clearing {}", partial.display()))?;
    }
    fs::create_dir_all(&partial).with_context(|| format!("creating {}", partial.display()))?;

    let walker = WalkDir::new(agent_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_excluded(&e.file_name().to_string_lossy()));
    let mut files = 0usize;
    for entry in walker {
        let entry = entry.context("walking installation")?;
        let rel = entry
            .path()
            .strip_prefix(agent_dir)
            .context("entry outside installation")?;
        let dest = partial.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copying {}", entry.path().display()))?;
            files += 1;
        }
    }

    fs::rename(&partial, &target).with_context(|| format!("finalizing {}", target.display()))?;
    info!("[UPDATE] Backed up {} files to {}", files, target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::create_dir_all(root.join("temp")).unwrap();
        fs::create_dir_all(root.join("lib").join(".cache")).unwrap();
        fs::write(root.join("lab-agent"), b"binary v1").unwrap();
        fs::write(root.join("VERSION"), b"1.0.0").unwrap();
        fs::write(root.join("lib").join("helper.dat"), b"helper").unwrap();
        fs::write(root.join("lib").join(".cache").join("c"), b"cache").unwrap();
        fs::write(root.join("temp").join("installer.exe"), b"junk").unwrap();
        fs::write(root.join(".agent_identity"), b"id").unwrap();
    }

    #[test]
    fn test_backup_copies_tree_without_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path();
        populate(agent);

        let backup = create_backup(agent, &agent.join("backups"), "1.0.0").unwrap();
        assert_eq!(backup, agent.join("backups").join("agent_backup_1.0.0"));
        assert_eq!(fs::read(backup.join("lab-agent")).unwrap(), b"binary v1");
        assert_eq!(fs::read(backup.join("lib").join("helper.dat")).unwrap(), b"helper");
        assert!(!backup.join("temp").exists());
        assert!(!backup.join(".agent_identity").exists());
        assert!(!backup.join("lib").join(".cache").exists());
        assert!(!backup.join("backups").exists());
    }

    #[test]
    fn test_existing_backup_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path();
        populate(agent);
        let backups = agent.join("backups");

        let first = create_backup(agent, &backups, "1.0.0").unwrap();
        fs::write(agent.join("lab-agent"), b"binary changed").unwrap();
        let second = create_backup(agent, &backups, "1.0.0").unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read(second.join("lab-agent")).unwrap(), b"binary v1");
    }

    #[test]
    fn test_backup_name_is_path_safe() {
        assert_eq!(backup_name("1.2.3"), "agent_backup_1.2.3");
        assert_eq!(backup_name("../x y"), "agent_backup_.._x_y");
    }
}
