//! Patch applicator - runs a patch set over its target files
//!
//! This module provides high-level patch application that:
//! - Groups patches by target file, keeping declaration order
//! - Evaluates each rule's detector against the current in-memory content
//! - Plans every file in memory before writing any of them
//! - Backs up a file once, right before its first modification
//! - Writes back only when the content changed
//! - Reports one outcome per file and one status per rule
//!
//! File-scoped failures (unreadable file, backup or write failure) are
//! recorded and the run moves on to the next file. A rule defect aborts
//! the whole run.

use crate::backup::{self, BackupError, BackupOutcome};
use crate::config::schema::PatchConfig;
use crate::edit::{atomic_write, EditError};
use crate::safety::{SafetyError, WorkspaceGuard};
use crate::stale::StaleHint;
use crate::transform::{Detection, TransformError, Transformation};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Whether a run may touch the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Back up and write modified files
    Apply,
    /// Evaluate rules only; nothing is written
    Check,
}

/// Status of a single rule against a single file
#[derive(Debug, Clone, PartialEq)]
pub enum RuleStatus {
    /// The rule changed the content in this run (or would, in check mode)
    Applied,
    /// The rule's effect was already present
    AlreadyApplied,
    /// Neither the rule's target nor its effect was found
    TargetMissing { hint: Option<StaleHint> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleReport {
    pub id: String,
    pub status: RuleStatus,
}

/// In-memory result of running every rule for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePlan {
    pub original: String,
    pub patched: String,
    pub rules: Vec<RuleReport>,
}

impl FilePlan {
    pub fn changes(&self) -> bool {
        self.original != self.patched
    }
}

/// Outcome for one target file
#[derive(Debug, Clone, PartialEq)]
#[must_use = "FileOutcome should be reported"]
pub enum FileOutcome {
    /// Content changed; `backup` is `None` in check mode where nothing is written
    Modified {
        plan: FilePlan,
        backup: Option<BackupOutcome>,
    },
    /// Every rule was already satisfied or had nothing to match
    Unchanged { plan: FilePlan },
    /// The target file does not exist
    NotFound,
}

impl FileOutcome {
    pub fn plan(&self) -> Option<&FilePlan> {
        match self {
            FileOutcome::Modified { plan, .. } | FileOutcome::Unchanged { plan } => Some(plan),
            FileOutcome::NotFound => None,
        }
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOutcome::Modified { backup: None, .. } => write!(f, "would be modified"),
            FileOutcome::Modified { .. } => write!(f, "modified"),
            FileOutcome::Unchanged { .. } => write!(f, "no changes needed"),
            FileOutcome::NotFound => write!(f, "not found"),
        }
    }
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// Target file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Target resolves outside the workspace or into a forbidden directory
    Safety(SafetyError),
    /// Backup could not be created
    Backup(BackupError),
    /// Patched content could not be written
    Write { path: PathBuf, source: EditError },
    /// A rule misbehaved; continuing would leave inconsistent partial patches
    Rule(TransformError),
}

impl ApplicationError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplicationError::Rule(_))
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::Safety(e) => write!(f, "refusing to patch: {}", e),
            ApplicationError::Backup(e) => write!(f, "backup failed: {}", e),
            ApplicationError::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            ApplicationError::Rule(e) => write!(f, "rule error: {}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Backup(e) => Some(e),
            ApplicationError::Write { source, .. } => Some(source),
            ApplicationError::Rule(e) => Some(e),
        }
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

impl From<BackupError> for ApplicationError {
    fn from(e: BackupError) -> Self {
        ApplicationError::Backup(e)
    }
}

impl From<TransformError> for ApplicationError {
    fn from(e: TransformError) -> Self {
        ApplicationError::Rule(e)
    }
}

/// Report for one target file.
#[derive(Debug)]
pub struct FileReport {
    /// Path as written in the patch set
    pub file: String,
    /// Path the file was looked up at
    pub path: PathBuf,
    pub result: Result<FileOutcome, ApplicationError>,
}

/// Everything a patch run did, in file order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// Set when a broken rule stopped the run. Nothing was written then;
    /// files listed before the failing one report what would have changed.
    pub aborted: bool,
}

/// Rules for one target file, in declaration order
#[derive(Debug, Clone)]
pub struct FilePatches {
    pub file: String,
    pub rules: Vec<Transformation>,
}

/// Compile a patch set into per-file rule lists.
///
/// Files keep the order in which they first appear in the set.
pub fn compile(config: &PatchConfig) -> Result<Vec<FilePatches>, TransformError> {
    let mut groups: Vec<FilePatches> = Vec::new();

    for patch in &config.patches {
        let rule = Transformation::compile(patch)?;
        match groups.iter_mut().find(|g| g.file == patch.file) {
            Some(group) => group.rules.push(rule),
            None => groups.push(FilePatches {
                file: patch.file.clone(),
                rules: vec![rule],
            }),
        }
    }

    Ok(groups)
}

/// Run every rule over `original` in order and collect per-rule statuses.
pub fn plan(original: String, rules: &[Transformation]) -> Result<FilePlan, TransformError> {
    let mut current = original.clone();
    let mut reports = Vec::with_capacity(rules.len());

    for rule in rules {
        let step = rule.apply(&current)?;
        tracing::debug!(rule = rule.id(), detection = ?step.detection, "rule evaluated");

        let status = match (step.detection, step.output) {
            (Detection::Pending, Some(output)) => {
                current = output;
                RuleStatus::Applied
            }
            (Detection::Missing, _) => RuleStatus::TargetMissing {
                hint: rule.hint(&current),
            },
            _ => RuleStatus::AlreadyApplied,
        };

        reports.push(RuleReport {
            id: rule.id().to_string(),
            status,
        });
    }

    Ok(FilePlan {
        original,
        patched: current,
        rules: reports,
    })
}

/// Apply a patch configuration to a workspace
///
/// # Returns
///
/// A report with one entry per target file. The outer error covers
/// conditions that stop the run before any file is touched: a rule that
/// does not compile, or a workspace root that cannot be resolved.
pub fn apply_patches(
    config: &PatchConfig,
    workspace_root: &Path,
) -> Result<RunReport, ApplicationError> {
    run(config, workspace_root, Mode::Apply)
}

/// Check patch status without mutating the workspace.
///
/// Mirrors `apply_patches` result semantics (`Modified` means "would modify").
pub fn check_patches(
    config: &PatchConfig,
    workspace_root: &Path,
) -> Result<RunReport, ApplicationError> {
    run(config, workspace_root, Mode::Check)
}

pub fn run(
    config: &PatchConfig,
    workspace_root: &Path,
    mode: Mode,
) -> Result<RunReport, ApplicationError> {
    run_with(config, workspace_root, mode, &atomic_write)
}

/// Writes patched bytes over a target file.
type Writer = dyn Fn(&Path, &[u8]) -> Result<(), EditError>;

/// A target file after its rules ran in memory, before anything is written.
enum Prepared {
    NotFound,
    Planned { resolved: PathBuf, plan: FilePlan },
}

fn run_with(
    config: &PatchConfig,
    workspace_root: &Path,
    mode: Mode,
    write: &Writer,
) -> Result<RunReport, ApplicationError> {
    let groups = compile(config)?;
    let guard = WorkspaceGuard::new(workspace_root)?;
    let suffix = config.meta.backup_suffix.as_str();

    let entry = |group: &FilePatches, result| FileReport {
        file: group.file.clone(),
        path: guard.workspace_root().join(&group.file),
        result,
    };

    // Every file is planned before any is written, so a broken rule leaves
    // the checkout exactly as it was.
    let mut planned: Vec<(&FilePatches, Result<Prepared, ApplicationError>)> =
        Vec::with_capacity(groups.len());
    for group in &groups {
        match prepare(&guard, &group.file, &group.rules) {
            Err(e) if e.is_fatal() => {
                tracing::error!(file = %group.file, "aborting patch run, nothing written");
                let mut files: Vec<FileReport> = planned
                    .into_iter()
                    .map(|(group, prepared)| {
                        entry(group, prepared.and_then(|p| commit(p, suffix, Mode::Check, write)))
                    })
                    .collect();
                files.push(entry(group, Err(e)));
                return Ok(RunReport {
                    files,
                    aborted: true,
                });
            }
            prepared => planned.push((group, prepared)),
        }
    }

    let files = planned
        .into_iter()
        .map(|(group, prepared)| entry(group, prepared.and_then(|p| commit(p, suffix, mode, write))))
        .collect();

    Ok(RunReport {
        files,
        aborted: false,
    })
}

fn prepare(
    guard: &WorkspaceGuard,
    file: &str,
    rules: &[Transformation],
) -> Result<Prepared, ApplicationError> {
    let Some(resolved) = guard.resolve_target(file)? else {
        tracing::warn!(file, "target file not found");
        return Ok(Prepared::NotFound);
    };
    let original = fs::read_to_string(&resolved).map_err(|source| ApplicationError::Io {
        path: resolved.clone(),
        source,
    })?;

    let plan = plan(original, rules)?;
    Ok(Prepared::Planned { resolved, plan })
}

fn commit(
    prepared: Prepared,
    suffix: &str,
    mode: Mode,
    write: &Writer,
) -> Result<FileOutcome, ApplicationError> {
    let (resolved, plan) = match prepared {
        Prepared::NotFound => return Ok(FileOutcome::NotFound),
        Prepared::Planned { resolved, plan } => (resolved, plan),
    };

    if !plan.changes() {
        return Ok(FileOutcome::Unchanged { plan });
    }

    if mode == Mode::Check {
        return Ok(FileOutcome::Modified { plan, backup: None });
    }

    let backup = backup::backup(&resolved, suffix)?;
    write(&resolved, plan.patched.as_bytes()).map_err(|source| ApplicationError::Write {
        path: resolved.clone(),
        source,
    })?;
    tracing::info!(file = %resolved.display(), "patched");

    Ok(FileOutcome::Modified {
        plan,
        backup: Some(backup),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    const SET: &str = r##"
[meta]
backup_suffix = ".bak"

[[patches]]
id = "first"
file = "a.py"

[patches.operation]
type = "replace"
search = "old_name"
text = "new_name"

[[patches]]
id = "second"
file = "b.py"

[patches.operation]
type = "replace"
search = "x = 1"
text = "x = 2"

[[patches]]
id = "third"
file = "a.py"
marker = "# guarded"

[patches.operation]
type = "insert-after"
anchor = "(?m)^new_name\\(\\)$"
text = "# guarded\n"
"##;

    #[test]
    fn compile_groups_by_file_in_first_seen_order() {
        let config = load_from_str(SET).unwrap();
        let groups = compile(&config).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].file, "a.py");
        assert_eq!(
            groups[0].rules.iter().map(|r| r.id()).collect::<Vec<_>>(),
            vec!["first", "third"]
        );
        assert_eq!(groups[1].file, "b.py");
    }

    #[test]
    fn later_rule_anchors_on_earlier_output() {
        let config = load_from_str(SET).unwrap();
        let groups = compile(&config).unwrap();
        let plan = plan("old_name()\n".to_string(), &groups[0].rules).unwrap();
        assert_eq!(plan.patched, "new_name()\n# guarded\n");
        assert!(plan.rules.iter().all(|r| r.status == RuleStatus::Applied));
    }

    #[test]
    fn check_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "old_name()\n").unwrap();

        let config = load_from_str(SET).unwrap();
        let report = check_patches(&config, dir.path()).unwrap();

        assert!(matches!(
            report.files[0].result,
            Ok(FileOutcome::Modified { backup: None, .. })
        ));
        assert!(matches!(report.files[1].result, Ok(FileOutcome::NotFound)));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "old_name()\n"
        );
        assert!(!dir.path().join("a.py.bak").exists());
    }

    #[test]
    fn failing_write_is_reported_per_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "old_name()\n").unwrap();
        fs::write(dir.path().join("b.py"), "x = 1\n").unwrap();
        let config = load_from_str(SET).unwrap();

        let write = |path: &Path, bytes: &[u8]| -> Result<(), EditError> {
            if path.ends_with("b.py") {
                return Err(EditError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "file is locked",
                )));
            }
            atomic_write(path, bytes)
        };
        let report = run_with(&config, dir.path(), Mode::Apply, &write).unwrap();

        assert!(!report.aborted);
        assert!(matches!(
            report.files[0].result,
            Ok(FileOutcome::Modified { backup: Some(_), .. })
        ));
        let err = report.files[1].result.as_ref().unwrap_err();
        assert!(matches!(err, ApplicationError::Write { .. }));
        assert!(!err.is_fatal());

        assert_eq!(
            fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "new_name()\n# guarded\n"
        );
        assert_eq!(fs::read_to_string(dir.path().join("b.py")).unwrap(), "x = 1\n");
        // Backup precedes the write, so it holds the untouched original
        assert_eq!(
            fs::read_to_string(dir.path().join("b.py.bak")).unwrap(),
            "x = 1\n"
        );
    }

    #[test]
    fn broken_rule_in_later_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "old_name()\n").unwrap();
        fs::write(dir.path().join("c.py"), "y = 1\n").unwrap();
        let config = load_from_str(
            r#"
[[patches]]
id = "rename"
file = "a.py"

[patches.operation]
type = "replace"
search = "old_name"
text = "new_name"

[[patches]]
id = "grows-forever"
file = "c.py"

[patches.operation]
type = "regex-replace"
pattern = 'y = 1'
text = 'y = 1 + 0'
"#,
        )
        .unwrap();

        let report = apply_patches(&config, dir.path()).unwrap();

        assert!(report.aborted);
        assert_eq!(report.files.len(), 2);
        assert!(matches!(
            report.files[0].result,
            Ok(FileOutcome::Modified { backup: None, .. })
        ));
        assert!(report.files[1].result.as_ref().unwrap_err().is_fatal());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.py")).unwrap(),
            "old_name()\n"
        );
        assert!(!dir.path().join("a.py.patch_backup").exists());
    }

    #[test]
    fn outcome_display() {
        assert_eq!(FileOutcome::NotFound.to_string(), "not found");
    }
}
