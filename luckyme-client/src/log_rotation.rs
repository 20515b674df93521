//! Numbered backups of daemon log and state files.
//!
//! Before every daemon (re)launch each file is copied into the backup
//! directory as `<N>-<file name>`, where `N` is one more than the highest
//! existing number for that file name, and the original is removed:
//!   daemon.log → backups/0-daemon.log, then backups/1-daemon.log, …

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use luckyme_core::ClientError;

use crate::paths::{backups_dir, rotated_files};

pub struct LogRotator {
    backup_dir: PathBuf,
}

impl LogRotator {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn for_home(home: &Path) -> Self {
        Self::new(backups_dir(home))
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Back up every path. Missing files count as success; a failing file is
    /// logged and does not stop the others.
    pub fn backup<I, P>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut all_ok = true;
        for path in paths {
            let path = path.as_ref();
            match self.backup_file(path) {
                Ok(Some(dest)) => {
                    tracing::info!(path = %path.display(), backup = %dest.display(), "file backed up")
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "backup failed");
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Move one file into the backup directory.
    ///
    /// Returns `Ok(None)` when `path` does not exist or is not a regular file.
    pub fn backup_file(&self, path: &Path) -> Result<Option<PathBuf>, ClientError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ClientError::BackupIoFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if !meta.is_file() {
            tracing::debug!(path = %path.display(), "not a regular file, skipping backup");
            return Ok(None);
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        fs::create_dir_all(&self.backup_dir).map_err(|source| ClientError::BackupIoFailed {
            path: self.backup_dir.clone(),
            source,
        })?;

        let dest = self.backup_path(self.next_backup_number(file_name)?, file_name);
        fs::copy(path, &dest).map_err(|source| ClientError::BackupIoFailed {
            path: dest.clone(),
            source,
        })?;
        fs::remove_file(path).map_err(|source| ClientError::BackupIoFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(dest))
    }

    /// One more than the highest `<N>-<file_name>` in the backup directory,
    /// or 0 when there is none.
    pub fn next_backup_number(&self, file_name: &str) -> Result<u64, ClientError> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(ClientError::BackupIoFailed {
                    path: self.backup_dir.clone(),
                    source,
                })
            }
        };

        let mut highest: Option<u64> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((prefix, rest)) = name.split_once('-') else {
                continue;
            };
            if rest != file_name {
                continue;
            }
            match prefix.parse::<u64>() {
                Ok(n) => highest = Some(highest.map_or(n, |h| h.max(n))),
                Err(_) => tracing::warn!(file = %name, "ignoring backup with unparsable number"),
            }
        }
        Ok(highest.map_or(0, |h| h + 1))
    }

    pub fn backup_path(&self, number: u64, file_name: &str) -> PathBuf {
        self.backup_dir.join(format!("{number}-{file_name}"))
    }
}

/// Back up the daemon log and state files under `home`.
pub fn backup_daemon_files(home: &Path) -> bool {
    LogRotator::for_home(home).backup(rotated_files(home))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn next_number_follows_highest_existing_backup() {
        let dir = TempDir::new().unwrap();
        let rotator = LogRotator::new(dir.path().join("backups"));
        assert_eq!(rotator.next_backup_number("foo.db").unwrap(), 0);

        fs::create_dir_all(rotator.backup_dir()).unwrap();
        make_file(rotator.backup_dir(), "0-foo.db", "a");
        make_file(rotator.backup_dir(), "1-foo.db", "b");
        make_file(rotator.backup_dir(), "7-bar.db", "c");
        assert_eq!(rotator.next_backup_number("foo.db").unwrap(), 2);
    }

    #[test]
    fn unparsable_prefixes_are_ignored() {
        let dir = TempDir::new().unwrap();
        let rotator = LogRotator::new(dir.path());
        make_file(dir.path(), "3-foo.db", "a");
        make_file(dir.path(), "old-foo.db", "b");
        assert_eq!(rotator.next_backup_number("foo.db").unwrap(), 4);
    }

    #[test]
    fn backup_copies_then_removes_the_original() {
        let dir = TempDir::new().unwrap();
        let source = make_file(dir.path(), "foo.db", "state");
        let rotator = LogRotator::new(dir.path().join("backups"));

        assert!(rotator.backup([&source]));
        assert!(!source.exists());
        let backed_up = rotator.backup_path(0, "foo.db");
        assert_eq!(fs::read_to_string(backed_up).unwrap(), "state");

        make_file(dir.path(), "foo.db", "newer");
        assert!(rotator.backup([&source]));
        assert_eq!(
            fs::read_to_string(rotator.backup_path(1, "foo.db")).unwrap(),
            "newer"
        );
    }

    #[test]
    fn missing_and_non_regular_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let rotator = LogRotator::new(dir.path().join("backups"));
        let missing = dir.path().join("nope.log");
        let subdir = dir.path().join("a-directory");
        fs::create_dir(&subdir).unwrap();

        assert!(rotator.backup([&missing, &subdir]));
        assert!(!rotator.backup_dir().exists());
    }

    #[test]
    fn one_failure_does_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        let rotator = LogRotator::new(dir.path().join("backups"));
        // The numbered copy of a 254-byte name exceeds the file name limit.
        let long = make_file(dir.path(), &"x".repeat(254), "long");
        let short = make_file(dir.path(), "daemon.log", "log");

        assert!(!rotator.backup([&long, &short]));
        assert!(long.exists());
        assert!(!short.exists());
        assert!(rotator.backup_path(0, "daemon.log").exists());
    }

    #[test]
    fn daemon_files_under_home_are_backed_up() {
        let home = TempDir::new().unwrap();
        let log = crate::paths::daemon_log_path(home.path());
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "log").unwrap();

        assert!(backup_daemon_files(home.path()));
        assert!(backups_dir(home.path()).join("0-daemon.log").exists());
    }
}
