//! Wan2GP Patcher: idempotent source patching for a Wan2GP checkout
//!
//! Restores RTX 5090 compatibility in the application's Python sources by
//! applying named text transformations that are safe to run again and again.
//!
//! # Architecture
//!
//! Every rule compiles down to a single primitive: [`Edit`], a verified
//! byte-span replacement. A [`Transformation`] pairs a detector (is there
//! still work to do?) with an action that produces those spans. The
//! applicator runs a file's rules in order over the in-memory content and
//! writes the file back only when something changed.
//!
//! # Safety
//!
//! - Rules re-check their detector after running; a rule that would fire
//!   again aborts the run
//! - A backup of each file is taken once, before its first modification,
//!   and never overwritten
//! - Atomic file writes (tempfile + fsync + rename)
//! - Workspace boundary enforcement
//!
//! # Example
//!
//! ```no_run
//! use wan2gp_patcher::config::{apply_patches, load_builtin};
//! use std::path::Path;
//!
//! let config = load_builtin().expect("builtin set is valid");
//! let report = apply_patches(&config, Path::new(".")).expect("workspace exists");
//! for file in &report.files {
//!     match &file.result {
//!         Ok(outcome) => println!("{}: {}", file.file, outcome),
//!         Err(e) => eprintln!("{}: {}", file.file, e),
//!     }
//! }
//! ```

pub mod backup;
pub mod config;
pub mod edit;
pub mod safety;
pub mod stale;
pub mod transform;

// Re-exports
pub use backup::{BackupError, BackupOutcome, BackupState, RestoreOutcome};
pub use config::{
    apply_patches, check_patches, load_builtin, load_from_path, load_from_str, ApplicationError,
    ConfigError, FileOutcome, PatchConfig, RuleStatus, RunReport,
};
pub use edit::{Edit, EditError, EditVerification};
pub use safety::{SafetyError, WorkspaceGuard};
pub use stale::StaleHint;
pub use transform::{Detection, TransformError, Transformation};
