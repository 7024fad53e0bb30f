use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use shiftdb_common::{Error, Result};
use tracing::{debug, info, warn};

/// Files SQLite may keep next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// Whole-file copy of a database taken before any destructive step.
///
/// When the database did not exist yet there is nothing to copy; restoring
/// then means deleting whatever the failed run created.
#[derive(Debug)]
pub struct Snapshot {
    target: PathBuf,
    backup: Option<PathBuf>,
}

impl Snapshot {
    /// Copy `target` to a timestamped file in the same directory. The
    /// database must not be open while this runs.
    pub fn take(target: &Path) -> Result<Self> {
        if !target.exists() {
            debug!(
                "no existing database at {}, skipping backup",
                target.display()
            );
            return Ok(Self {
                target: target.to_path_buf(),
                backup: None,
            });
        }

        let backup = backup_path_for(target, Utc::now());
        if backup.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("backup file {} already exists", backup.display()),
            )));
        }
        fs::copy(target, &backup)?;
        info!("backed up {} to {}", target.display(), backup.display());

        Ok(Self {
            target: target.to_path_buf(),
            backup: Some(backup),
        })
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Put the snapshot back in place of the target, replacing any partial
    /// state. The database must be closed.
    pub fn restore(self) -> Result<()> {
        remove_sidecars(&self.target)?;
        match &self.backup {
            Some(backup) => {
                fs::rename(backup, &self.target)?;
                info!("restored {} from {}", self.target.display(), backup.display());
            }
            None => {
                remove_if_exists(&self.target)?;
                info!("removed partially created {}", self.target.display());
            }
        }
        Ok(())
    }

    /// Delete the snapshot after a successful run. A snapshot that is already
    /// gone is not an error.
    pub fn discard(self) -> Result<()> {
        if let Some(backup) = &self.backup {
            remove_if_exists(backup)?;
            debug!("discarded backup {}", backup.display());
        }
        Ok(())
    }
}

/// `<dir>/<stem>-<YYYYMMDDHHMMSS>.<ext>` next to `target`.
pub fn backup_path_for(target: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{stem}-{}", now.format("%Y%m%d%H%M%S"));
    if let Some(ext) = target.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    target.with_file_name(name)
}

/// `target` with `suffix` appended, e.g. `app.sqlite-wal`.
pub(crate) fn sidecar_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_sidecars(target: &Path) -> Result<()> {
    for suffix in SIDECAR_SUFFIXES {
        let path = sidecar_path(target, suffix);
        if path.exists() {
            warn!("removing stale {}", path.display());
            remove_if_exists(&path)?;
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
