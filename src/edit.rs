use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every transformation compiles down to a list of these spans. Intelligence
/// lives in span acquisition (literal search, regex, anchors), not in the
/// application logic, so the bytes outside each span are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until applied"]
pub struct Edit {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to insert at [byte_start, byte_end)
    pub new_text: String,
    /// Verification of what we expect to find before applying
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (faster for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Before-text verification failed at byte {byte_start}: found {found:?}")]
    BeforeTextMismatch {
        byte_start: usize,
        byte_end: usize,
        found: String,
    },

    #[error("Invalid byte range: [{byte_start}, {byte_end}) in text of length {len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        len: usize,
    },

    #[error("Overlapping edits at bytes {first_end} > {second_start}")]
    Overlap {
        first_end: usize,
        second_start: usize,
    },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: &str,
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(expected_before),
        }
    }

    /// Zero-width edit that inserts `text` at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset, offset, text, "")
    }

    /// Validate the edit against the text it will be spliced into.
    fn validate(&self, content: &str) -> Result<(), EditError> {
        if self.byte_start > self.byte_end
            || self.byte_end > content.len()
            || !content.is_char_boundary(self.byte_start)
            || !content.is_char_boundary(self.byte_end)
        {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                len: content.len(),
            });
        }

        let current = &content[self.byte_start..self.byte_end];
        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                found: current.to_string(),
            });
        }

        Ok(())
    }

    /// Apply a set of non-overlapping edits to `content` and return the result.
    ///
    /// Edits are sorted by byte_start descending and spliced bottom-to-top
    /// to avoid offset invalidation. All edits are validated before any
    /// splice happens, so a failure leaves nothing half-applied.
    pub fn apply_all(content: &str, mut edits: Vec<Edit>) -> Result<String, EditError> {
        if edits.is_empty() {
            return Ok(content.to_string());
        }

        edits.sort_by(|a, b| b.byte_start.cmp(&a.byte_start));

        for edit in &edits {
            edit.validate(content)?;
        }

        // Sorted descending: the earlier span must end before the later one starts
        for window in edits.windows(2) {
            let (later, earlier) = (&window[0], &window[1]);
            if earlier.byte_end > later.byte_start {
                return Err(EditError::Overlap {
                    first_end: earlier.byte_end,
                    second_start: later.byte_start,
                });
            }
        }

        let mut out = content.to_string();
        for edit in &edits {
            out.replace_range(edit.byte_start..edit.byte_end, &edit.new_text);
        }
        Ok(out)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes. The original file's
/// permissions are carried over and its mtime is bumped so cached bytecode
/// next to the source is invalidated.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    filetime::set_file_mtime(path, filetime::FileTime::now())?;

    Ok(())
}
