use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Directories inside a checkout that no patch may reach into.
const FORBIDDEN_DIRS: &[&str] = &[".git"];

/// Keeps rule targets inside the Wan2GP checkout being patched.
///
/// Target names come from patch sets, which may be user supplied, so every
/// path is resolved through symlinks before it is read or written.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    /// Canonical checkout root
    workspace_root: PathBuf,
    /// Canonical forbidden directories that exist in this checkout
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("{path} resolves outside the checkout at {workspace}")]
    OutsideWorkspace { path: PathBuf, workspace: PathBuf },

    #[error("{path} is inside {forbidden}, which is never patched")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("cannot resolve {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn canonicalize(path: &Path) -> Result<PathBuf, SafetyError> {
    path.canonicalize()
        .map_err(|source| SafetyError::Canonicalize {
            path: path.to_path_buf(),
            source,
        })
}

impl WorkspaceGuard {
    /// Guard the checkout rooted at `workspace_root`, which must exist.
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let workspace_root = canonicalize(workspace_root.as_ref())?;

        let forbidden_paths = FORBIDDEN_DIRS
            .iter()
            .filter_map(|dir| workspace_root.join(dir).canonicalize().ok())
            .collect();

        Ok(Self {
            workspace_root,
            forbidden_paths,
        })
    }

    /// Resolve an existing path and check it stays inside the checkout.
    ///
    /// Relative paths are taken from the checkout root. Returns the
    /// canonical path.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let canonical = if path.is_absolute() {
            canonicalize(path)?
        } else {
            canonicalize(&self.workspace_root.join(path))?
        };

        if !canonical.starts_with(&self.workspace_root) {
            return Err(SafetyError::OutsideWorkspace {
                path: canonical,
                workspace: self.workspace_root.clone(),
            });
        }

        if let Some(forbidden) = self
            .forbidden_paths
            .iter()
            .find(|forbidden| canonical.starts_with(forbidden))
        {
            return Err(SafetyError::ForbiddenPath {
                path: canonical,
                forbidden: forbidden.clone(),
            });
        }

        Ok(canonical)
    }

    /// Resolve a rule's target file.
    ///
    /// `Ok(None)` when the file does not exist in this checkout.
    pub fn resolve_target(&self, file: &str) -> Result<Option<PathBuf>, SafetyError> {
        let path = self.workspace_root.join(file);
        if !path.exists() {
            return Ok(None);
        }
        self.validate_path(path).map(Some)
    }

    /// Resolve where a backup would be restored to.
    ///
    /// Unlike [`resolve_target`](Self::resolve_target) this also covers a
    /// deleted file, whose backup can still bring it back. The containing
    /// directory is checked in its place.
    pub fn restore_target(&self, file: &str) -> Result<PathBuf, SafetyError> {
        if let Some(resolved) = self.resolve_target(file)? {
            return Ok(resolved);
        }

        let path = self.workspace_root.join(file);
        let outside = || SafetyError::OutsideWorkspace {
            path: path.clone(),
            workspace: self.workspace_root.clone(),
        };
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(outside());
        };

        if parent.exists() {
            return Ok(self.validate_path(parent)?.join(name));
        }

        // No directory means no backup either; only a lexical escape is wrong
        let escapes = Path::new(file)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(outside());
        }
        Ok(path)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}
