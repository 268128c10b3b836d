//! Natural ("human") ordering of file names and paths.
//!
//! Digit runs are compared by numeric value and everything else
//! case-insensitively, so `img2.png` sorts before `img10.png`.
//!
//! # Example
//!
//! ```
//! use modeldex::scanner::natural::natural_cmp;
//!
//! let mut names = vec!["img2.png", "img10.png", "img1.png"];
//! names.sort_by(|a, b| natural_cmp(a, b));
//! assert_eq!(names, vec!["img1.png", "img2.png", "img10.png"]);
//! ```

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

/// One piece of a [`NaturalKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    /// Lowercased non-digit text
    Text(String),
    /// Digit run with leading zeros stripped (arbitrary length)
    Number(String),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            // Longer digit strings without leading zeros are larger numbers
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            // Splitting alternates text and digits, so these only meet on malformed keys
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key that orders strings naturally.
///
/// The key always alternates text and number chunks, starting with a
/// (possibly empty) text chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey(Vec<Chunk>);

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new("[0-9]+").expect("static regex is valid"))
}

impl NaturalKey {
    /// Build the key for `s`.
    #[must_use]
    pub fn new(s: &str) -> Self {
        let mut chunks = Vec::new();
        let mut last = 0;
        for m in digit_runs().find_iter(s) {
            chunks.push(Chunk::Text(s[last..m.start()].to_lowercase()));
            let trimmed = m.as_str().trim_start_matches('0');
            chunks.push(Chunk::Number(trimmed.to_string()));
            last = m.end();
        }
        chunks.push(Chunk::Text(s[last..].to_lowercase()));
        Self(chunks)
    }
}

/// Compare two strings in natural order.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    NaturalKey::new(a).cmp(&NaturalKey::new(b))
}
