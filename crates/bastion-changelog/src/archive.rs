//! File archive holding pre-change copies of files
//!
//! A file `/etc/ssh/sshd_config` is archived as
//! `<archive>/etc/ssh/sshd_config.ovf`. When that backup already exists with
//! different contents the new copy gets a timestamp suffix instead, so older
//! backups referenced by other events are never overwritten.

use bastion_common::crypto::{sha256_file, verify_file};
use bastion_core::{Error, Result};
use chrono::Utc;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const BACKUP_SUFFIX: &str = ".ovf";

/// A stored copy of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub path: PathBuf,
    /// SHA-256 of the copied contents
    pub checksum: String,
}

/// Directory tree of file backups
#[derive(Debug, Clone)]
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Primary backup location for a file
    pub fn backup_path_for(&self, original: &Path) -> Result<PathBuf> {
        let absolute = if original.is_absolute() {
            original.to_path_buf()
        } else {
            std::env::current_dir()?.join(original)
        };

        let mut dest = self.root.clone();
        for component in absolute.components() {
            if let Component::Normal(part) = component {
                dest.push(part);
            }
        }
        if dest == self.root {
            return Err(Error::Other(format!(
                "Cannot archive {}: not a file path",
                original.display()
            )));
        }

        let mut name = dest.into_os_string();
        name.push(BACKUP_SUFFIX);
        Ok(PathBuf::from(name))
    }

    /// Copy a file into the archive. Returns `None` when the file does not
    /// exist. An identical existing backup is reused.
    pub fn archive(&self, original: &Path) -> Result<Option<Backup>> {
        if !original.is_file() {
            debug!("{:?} doesn't exist, skipping backup", original);
            return Ok(None);
        }

        let checksum = sha256_file(original)?;
        let primary = self.backup_path_for(original)?;
        if let Some(parent) = primary.parent() {
            create_private_dir(parent)?;
        }

        let dest = if !primary.exists() || verify_file(&primary, &checksum) {
            primary
        } else {
            self.timestamped(&primary)
        };

        if dest.exists() && verify_file(&dest, &checksum) {
            debug!("Reusing identical backup {:?}", dest);
        } else {
            debug!("Copying {:?} to {:?}", original, dest);
            fs::copy(original, &dest)?;
        }

        Ok(Some(Backup {
            path: dest,
            checksum,
        }))
    }

    fn timestamped(&self, primary: &Path) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let mut candidate = with_suffix(primary, &stamp);
        let mut n = 1;
        while candidate.exists() {
            candidate = with_suffix(primary, &format!("{}-{}", stamp, n));
            n += 1;
        }
        candidate
    }

    /// Copy a backup back over `dest`, refusing a missing or altered backup
    pub fn restore(&self, backup: &Path, checksum: &str, dest: &Path) -> Result<()> {
        if !verify_file(backup, checksum) {
            return Err(Error::BackupInvalid {
                path: backup.display().to_string(),
            });
        }
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::copy(backup, dest)?;
        debug!("Restored {:?} from {:?}", dest, backup);
        Ok(())
    }

    /// Remove a backup that is no longer referenced
    pub fn discard(&self, backup: &Path) -> Result<()> {
        match fs::remove_file(backup) {
            Ok(()) => {
                debug!("Discarded backup {:?}", backup);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_layout() {
        let archive = FileArchive::new("/var/lib/bastion/archive");
        assert_eq!(
            archive.backup_path_for(Path::new("/etc/ssh/sshd_config")).unwrap(),
            PathBuf::from("/var/lib/bastion/archive/etc/ssh/sshd_config.ovf")
        );
        assert!(archive.backup_path_for(Path::new("/")).is_err());
    }

    #[test]
    fn test_archive_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path().join("archive"));
        assert!(archive.archive(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_archive_reuses_identical_and_suffixes_different() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path().join("archive"));
        let file = dir.path().join("example.conf");

        fs::write(&file, "foo=0\n").unwrap();
        let first = archive.archive(&file).unwrap().unwrap();
        let again = archive.archive(&file).unwrap().unwrap();
        assert_eq!(first, again);
        assert!(first.path.to_string_lossy().ends_with("example.conf.ovf"));

        fs::write(&file, "foo=1\n").unwrap();
        let second = archive.archive(&file).unwrap().unwrap();
        assert_ne!(second.path, first.path);
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "foo=0\n");
        assert_eq!(fs::read_to_string(&second.path).unwrap(), "foo=1\n");
    }

    #[test]
    fn test_restore_checks_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path().join("archive"));
        let file = dir.path().join("example.conf");
        fs::write(&file, "foo=0\n").unwrap();

        let backup = archive.archive(&file).unwrap().unwrap();
        fs::write(&file, "foo=1\n").unwrap();
        archive.restore(&backup.path, &backup.checksum, &file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "foo=0\n");

        fs::write(&backup.path, "tampered").unwrap();
        let err = archive
            .restore(&backup.path, &backup.checksum, &file)
            .unwrap_err();
        assert_eq!(err.code(), "BACKUP_INVALID");
    }

    #[test]
    fn test_discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FileArchive::new(dir.path());
        archive.discard(&dir.path().join("gone.ovf")).unwrap();
    }
}
