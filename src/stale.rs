//! Hints for rules whose target text has drifted upstream.
//!
//! When a literal rule finds neither its search text nor its replacement,
//! the most similar line in the file is usually the edited version of the
//! line the rule was written against.

use std::collections::HashSet;

use strsim::normalized_levenshtein;

/// Lines scoring below this are not worth showing.
const MIN_SIMILARITY: f64 = 0.6;

/// Candidate line for a rule that no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleHint {
    /// 1-based line number
    pub line: usize,
    pub text: String,
    pub similarity: f64,
}

/// Find the line in `content` most similar to the first line of `needle`.
///
/// Search text is usually a fragment of a longer line, so lines longer than
/// the probe are also scored window by window.
pub fn closest_line(content: &str, needle: &str) -> Option<StaleHint> {
    let probe = needle.lines().map(str::trim).find(|l| !l.is_empty())?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| StaleHint {
            line: idx + 1,
            text: line.trim().to_string(),
            similarity: score(probe, line.trim()),
        })
        .filter(|hint| hint.similarity >= MIN_SIMILARITY)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}

fn score(probe: &str, line: &str) -> f64 {
    let whole = normalized_levenshtein(probe, line);

    let width = probe.chars().count();
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= width || bigram_overlap(probe, line) < MIN_SIMILARITY {
        return whole;
    }

    chars
        .windows(width)
        .map(|window| normalized_levenshtein(probe, &window.iter().collect::<String>()))
        .fold(whole, f64::max)
}

/// Share of the probe's character pairs that also occur in `line`.
///
/// Cheap filter that keeps the windowed scan off unrelated lines.
fn bigram_overlap(probe: &str, line: &str) -> f64 {
    let pairs = |s: &str| {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect::<Vec<_>>()
    };

    let wanted = pairs(probe);
    if wanted.is_empty() {
        return 0.0;
    }
    let present: HashSet<(char, char)> = pairs(line).into_iter().collect();
    let hits = wanted.iter().filter(|pair| present.contains(pair)).count();
    hits as f64 / wanted.len() as f64
}
