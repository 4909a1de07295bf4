//! Glob patterns for id and key matching.
//!
//! MATCH patterns support `*` (any run) and `?` (any single char). Patterns
//! are translated to anchored regexes once and reused for every candidate.

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    /// None when the pattern is `*` (matches everything) or has no
    /// metacharacters (plain equality).
    re: Option<Regex>,
    literal: bool,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(Self {
                pattern: pattern.to_string(),
                re: None,
                literal: false,
            });
        }
        if !pattern.contains(['*', '?']) {
            return Ok(Self {
                pattern: pattern.to_string(),
                re: None,
                literal: true,
            });
        }
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');
        let re = Regex::new(&expr).map_err(|_| Error::InvalidArgument(pattern.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            re: Some(re),
            literal: false,
        })
    }

    /// Matches everything; lets scans skip per-candidate work.
    pub fn is_all(&self) -> bool {
        self.re.is_none() && !self.literal
    }

    pub fn matches(&self, s: &str) -> bool {
        match &self.re {
            Some(re) => re.is_match(s),
            None if self.literal => self.pattern == s,
            None => true,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The longest literal prefix before the first metacharacter. Scans use
    /// it to seek into the ordered index instead of walking from the start.
    pub fn literal_prefix(&self) -> &str {
        match self.pattern.find(['*', '?']) {
            Some(idx) => &self.pattern[..idx],
            None => &self.pattern,
        }
    }
}
