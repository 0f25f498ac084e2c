//! Compiled transformations.
//!
//! A [`Transformation`] is a pure `(text) -> text` rule with an explicit
//! detector. The detector decides whether the rule still has work to do;
//! the action compiles to verified byte-span [`Edit`]s which are spliced
//! into the in-memory content. Nothing here touches the filesystem.

use crate::config::schema::{Operation, PatchDefinition};
use crate::edit::{Edit, EditError};
use crate::stale::{closest_line, StaleHint};
use regex::Regex;
use thiserror::Error;

/// Result of running a rule's detector against some text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The rule's target is present and the action would change the text
    Pending,
    /// The marker or the rule's replacement text is already there
    Applied,
    /// Neither the target nor evidence of the rule's effect was found
    Missing,
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("patch '{id}' has an invalid regex: {source}")]
    Pattern { id: String, source: regex::Error },

    #[error("patch '{id}' produced unusable edits: {source}")]
    Edit { id: String, source: EditError },

    #[error("patch '{id}' is not idempotent: its target is still present after applying")]
    NotIdempotent { id: String },
}

#[derive(Debug, Clone)]
enum Action {
    Literal { search: String, text: String },
    Regex { pattern: Regex, text: String },
    InsertAfter { anchor: Regex, text: String },
}

/// A named, idempotent text-rewrite rule.
#[derive(Debug, Clone)]
pub struct Transformation {
    id: String,
    marker: Option<String>,
    action: Action,
}

/// One rule applied to one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Detector result before the action ran
    pub detection: Detection,
    /// Rewritten text, present only when the rule changed something
    pub output: Option<String>,
}

impl Transformation {
    pub fn compile(def: &PatchDefinition) -> Result<Self, TransformError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| TransformError::Pattern {
                id: def.id.clone(),
                source,
            })
        };

        let action = match &def.operation {
            Operation::Replace { search, text } => Action::Literal {
                search: search.clone(),
                text: text.clone(),
            },
            Operation::RegexReplace { pattern, text } => Action::Regex {
                pattern: compile(pattern)?,
                text: text.clone(),
            },
            Operation::InsertAfter { anchor, text } => Action::InsertAfter {
                anchor: compile(anchor)?,
                text: text.clone(),
            },
        };

        Ok(Self {
            id: def.id.clone(),
            marker: def.marker.clone(),
            action,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decide whether the rule still has work to do on `content`.
    ///
    /// A literal or regex target that is still present is always pending,
    /// even when the marker shows up elsewhere in the file. The marker only
    /// counts as evidence once the target is gone. Insertions have no target
    /// of their own, so for them the marker decides.
    pub fn detect(&self, content: &str) -> Detection {
        let marked = self
            .marker
            .as_deref()
            .is_some_and(|marker| content.contains(marker));

        match &self.action {
            Action::Literal { search, text } => {
                if content.contains(search.as_str()) {
                    Detection::Pending
                } else if marked || (!text.is_empty() && content.contains(text.as_str())) {
                    Detection::Applied
                } else {
                    Detection::Missing
                }
            }
            Action::Regex { pattern, .. } => {
                if pattern.is_match(content) {
                    Detection::Pending
                } else if marked {
                    Detection::Applied
                } else {
                    Detection::Missing
                }
            }
            Action::InsertAfter { anchor, .. } => {
                if marked {
                    Detection::Applied
                } else if anchor.is_match(content) {
                    Detection::Pending
                } else {
                    Detection::Missing
                }
            }
        }
    }

    /// Byte-span edits that carry out the action on `content`.
    ///
    /// Empty when the action has nothing to do.
    pub fn edits(&self, content: &str) -> Vec<Edit> {
        match &self.action {
            Action::Literal { search, text } => content
                .match_indices(search.as_str())
                .map(|(start, found)| Edit::new(start, start + found.len(), text.clone(), found))
                .collect(),
            Action::Regex { pattern, text } => pattern
                .captures_iter(content)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let mut replacement = String::new();
                    caps.expand(text, &mut replacement);
                    Some(Edit::new(
                        whole.start(),
                        whole.end(),
                        replacement,
                        whole.as_str(),
                    ))
                })
                .collect(),
            Action::InsertAfter { anchor, text } => match anchor.find(content) {
                Some(found) => {
                    let (offset, needs_newline) = end_of_line(content, found.end());
                    let mut block = String::with_capacity(text.len() + 2);
                    if needs_newline {
                        block.push('\n');
                    }
                    block.push_str(text);
                    if !block.ends_with('\n') {
                        block.push('\n');
                    }
                    vec![Edit::insert(offset, block)]
                }
                None => Vec::new(),
            },
        }
    }

    /// Run the detector and, when pending, the action.
    ///
    /// The rewritten text is checked against the detector again: a rule
    /// that is still pending after running would rewrite the file on every
    /// run, which is a defect in the rule itself.
    pub fn apply(&self, content: &str) -> Result<Step, TransformError> {
        let detection = self.detect(content);
        if detection != Detection::Pending {
            return Ok(Step {
                detection,
                output: None,
            });
        }

        let edits = self.edits(content);
        let output = Edit::apply_all(content, edits).map_err(|source| TransformError::Edit {
            id: self.id.clone(),
            source,
        })?;

        if self.detect(&output) == Detection::Pending {
            return Err(TransformError::NotIdempotent {
                id: self.id.clone(),
            });
        }

        Ok(Step {
            detection,
            output: (output != content).then_some(output),
        })
    }

    /// Closest existing line to what a literal rule searches for.
    ///
    /// Only literal rules carry text that can be compared line by line.
    pub fn hint(&self, content: &str) -> Option<StaleHint> {
        match &self.action {
            Action::Literal { search, .. } => closest_line(content, search),
            _ => None,
        }
    }
}

/// Offset just past the line containing byte `end - 1`.
///
/// The bool is set when the file ends without a newline and one has to be
/// supplied before the inserted block.
fn end_of_line(content: &str, end: usize) -> (usize, bool) {
    if end > 0 && content.as_bytes()[end - 1] == b'\n' {
        return (end, false);
    }
    match content[end..].find('\n') {
        Some(idx) => (end + idx + 1, false),
        None => (content.len(), true),
    }
}
