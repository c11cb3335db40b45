//! Path exemption matching.
//!
//! # Responsibilities
//! - Compile `skip_path_regex` patterns once per provider version
//! - Test the raw request path against them in declaration order
//!
//! # Design Decisions
//! - Any match exempts; the first hit short-circuits
//! - Empty pattern list exempts nothing
//! - Patterns are unanchored unless the operator anchors them
//! - Compilation failures surface at load time, never per request

use regex::Regex;
use thiserror::Error;

/// A pattern that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{pattern}` is not a valid regular expression: {message}")]
pub struct PatternError {
    /// Position in the configured list.
    pub index: usize,
    pub pattern: String,
    pub message: String,
}

/// Returns true if any pattern matches `path`.
pub fn is_exempt(path: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(path))
}

/// Compiled exemption patterns of one provider snapshot.
#[derive(Debug, Clone, Default)]
pub struct ExemptionSet {
    patterns: Vec<Regex>,
}

impl ExemptionSet {
    /// Compile every pattern, reporting all failures.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, Vec<PatternError>> {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut errors = Vec::new();

        for (index, pattern) in patterns.iter().enumerate() {
            match Regex::new(pattern.as_ref()) {
                Ok(regex) => compiled.push(regex),
                Err(e) => errors.push(PatternError {
                    index,
                    pattern: pattern.as_ref().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        if errors.is_empty() {
            Ok(Self { patterns: compiled })
        } else {
            Err(errors)
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        is_exempt(path, &self.patterns)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
