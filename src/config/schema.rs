use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_BACKUP_SUFFIX: &str = ".patch_backup";
pub const DEFAULT_ENTRY_FILE: &str = "wgp.py";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        if self.meta.backup_suffix.trim().is_empty() {
            issues.push(ValidationIssue::InvalidCombo {
                patch_id: None,
                message: "meta.backup_suffix must not be empty".to_string(),
            });
        }

        let mut seen = HashSet::new();

        for patch in &self.patches {
            let id = Some(patch.id.clone());

            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    patch_id: patch.id.clone(),
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: id.clone(),
                    field: "file",
                });
            }
            if matches!(&patch.marker, Some(m) if m.is_empty()) {
                issues.push(ValidationIssue::MissingField {
                    patch_id: id.clone(),
                    field: "marker",
                });
            }

            match &patch.operation {
                Operation::Replace { search, text } => {
                    if search.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "operation.search",
                        });
                    } else if text.contains(search.as_str()) {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: id.clone(),
                            message: "replacement text contains the search text, \
                                      so the patch would apply again on every run"
                                .to_string(),
                        });
                    }
                }
                Operation::RegexReplace { pattern, .. } => {
                    if pattern.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "operation.pattern",
                        });
                    } else if let Err(e) = regex::Regex::new(pattern) {
                        issues.push(ValidationIssue::InvalidPattern {
                            patch_id: patch.id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
                Operation::InsertAfter { anchor, text } => {
                    if anchor.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "operation.anchor",
                        });
                    } else if let Err(e) = regex::Regex::new(anchor) {
                        issues.push(ValidationIssue::InvalidPattern {
                            patch_id: patch.id.clone(),
                            message: e.to_string(),
                        });
                    }
                    if text.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "operation.text",
                        });
                    }
                    match patch.marker.as_deref() {
                        None => issues.push(ValidationIssue::MissingField {
                            patch_id: id.clone(),
                            field: "marker",
                        }),
                        Some(marker) if !marker.is_empty() && !text.contains(marker) => {
                            issues.push(ValidationIssue::InvalidCombo {
                                patch_id: id.clone(),
                                message: "insert-after text must contain the marker".to_string(),
                            });
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Distinct target files in order of first appearance.
    pub fn target_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for patch in &self.patches {
            if !files.contains(&patch.file.as_str()) {
                files.push(patch.file.as_str());
            }
        }
        files
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// File whose presence identifies the workspace root
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            entry_file: default_entry_file(),
            backup_suffix: default_backup_suffix(),
        }
    }
}

fn default_entry_file() -> String {
    DEFAULT_ENTRY_FILE.to_string()
}

fn default_backup_suffix() -> String {
    DEFAULT_BACKUP_SUFFIX.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    /// Workspace-relative path of the target file
    pub file: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Text whose presence proves the patch is already in place
    #[serde(default)]
    pub marker: Option<String>,
    pub operation: Operation,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    /// Replace every occurrence of a literal string
    Replace { search: String, text: String },
    /// Replace every regex match; `text` may reference groups as `${1}`
    RegexReplace { pattern: String, text: String },
    /// Insert `text` after the line matched by `anchor`
    InsertAfter { anchor: String, text: String },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Replace { .. } => "replace",
            Operation::RegexReplace { .. } => "regex-replace",
            Operation::InsertAfter { .. } => "insert-after",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        patch_id: String,
    },
    InvalidPattern {
        patch_id: String,
        message: String,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { patch_id } => {
                write!(f, "patch id '{patch_id}' is used more than once")
            }
            ValidationIssue::InvalidPattern { patch_id, message } => {
                write!(f, "patch '{patch_id}' has an invalid regex: {message}")
            }
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
