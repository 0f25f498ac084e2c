//! Backup store for target files.
//!
//! A backup lives next to its original as `<file><suffix>` and holds the
//! bytes the file had before it was first patched. The existence of the
//! backup file is the "already backed up" marker: it is created at most
//! once and never overwritten.

use crate::edit::atomic_write;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write backup {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to restore {path} from backup: {source}")]
    Restore {
        path: PathBuf,
        source: crate::edit::EditError,
    },
}

/// What `backup` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A new backup was written
    Created { backup: PathBuf },
    /// A backup already existed and was left untouched
    Existing { backup: PathBuf },
}

impl BackupOutcome {
    pub fn path(&self) -> &Path {
        match self {
            BackupOutcome::Created { backup } | BackupOutcome::Existing { backup } => backup,
        }
    }
}

/// Relationship between a target file and its backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    /// No backup exists
    Missing,
    /// Backup bytes equal the current file
    Identical,
    /// Backup differs from the current file (normally: the file is patched)
    Differs,
}

/// Path of the backup for `path`: the suffix is appended to the full file name.
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `path` to its backup location unless a backup already exists.
///
/// The copy goes to a temporary file first and is moved into place with a
/// no-clobber rename, so a half-written backup is never visible and an
/// existing backup always wins.
pub fn backup(path: &Path, suffix: &str) -> Result<BackupOutcome, BackupError> {
    let target = backup_path(path, suffix);
    if target.exists() {
        tracing::debug!(backup = %target.display(), "backup already present");
        return Ok(BackupOutcome::Existing { backup: target });
    }

    let write_err = |source: io::Error| BackupError::Write {
        path: target.clone(),
        source,
    };

    let mut source = fs::File::open(path).map_err(|source| BackupError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let metadata = source.metadata().map_err(|source| BackupError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    io::copy(&mut source, temp.as_file_mut()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    fs::set_permissions(temp.path(), metadata.permissions()).map_err(write_err)?;

    match temp.persist_noclobber(&target) {
        Ok(_) => {}
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            return Ok(BackupOutcome::Existing {
                backup: target.clone(),
            });
        }
        Err(e) => return Err(write_err(e.error)),
    }

    // Mirror the original's timestamps like a metadata-preserving copy
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    filetime::set_file_times(&target, atime, mtime).map_err(write_err)?;

    tracing::info!(backup = %target.display(), "backup created");
    Ok(BackupOutcome::Created { backup: target })
}

/// Compare a target file with its backup.
pub fn inspect(path: &Path, suffix: &str) -> Result<BackupState, BackupError> {
    let target = backup_path(path, suffix);
    if !target.exists() {
        return Ok(BackupState::Missing);
    }

    let read = |p: &Path| {
        fs::read(p).map_err(|source| BackupError::Read {
            path: p.to_path_buf(),
            source,
        })
    };

    let current = read(path)?;
    let saved = read(&target)?;
    if current.len() == saved.len() && xxh3_64(&current) == xxh3_64(&saved) {
        Ok(BackupState::Identical)
    } else {
        Ok(BackupState::Differs)
    }
}

/// What `restore` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The original content was put back and the backup removed
    Restored { backup: PathBuf },
    /// There was nothing to restore from
    NoBackup,
}

/// Put the backed-up bytes back over `path` and remove the backup.
///
/// Removing the backup means the next patch run captures a fresh original,
/// which matters after the upstream checkout has been updated.
pub fn restore(path: &Path, suffix: &str) -> Result<RestoreOutcome, BackupError> {
    let target = backup_path(path, suffix);
    if !target.exists() {
        return Ok(RestoreOutcome::NoBackup);
    }

    let saved = fs::read(&target).map_err(|source| BackupError::Read {
        path: target.clone(),
        source,
    })?;
    atomic_write(path, &saved).map_err(|source| BackupError::Restore {
        path: path.to_path_buf(),
        source,
    })?;
    fs::remove_file(&target).map_err(|source| BackupError::Write {
        path: target.clone(),
        source,
    })?;

    tracing::info!(file = %path.display(), "restored from backup");
    Ok(RestoreOutcome::Restored { backup: target })
}
