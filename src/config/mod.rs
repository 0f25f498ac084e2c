pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_patches, check_patches, ApplicationError, FileOutcome, FilePlan, FileReport, Mode,
    RuleReport, RuleStatus, RunReport,
};
pub use loader::{load_builtin, load_from_path, load_from_str, ConfigError, BUILTIN_SOURCE};
pub use schema::{
    Metadata, Operation, PatchConfig, PatchDefinition, ValidationError, ValidationIssue,
};
