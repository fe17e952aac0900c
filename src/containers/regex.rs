//! Builtin Regex container. Backed by the `regex` crate rather than a
//! hand-rolled engine — regular expression matching is exactly the kind
//! of non-trivial textual concern better served by a real crate than a
//! hand-rolled implementation.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct RegexData {
    pattern: String,
    compiled: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexError(pub String);

impl RegexData {
    pub fn compile(pattern: &str) -> Result<Self, RegexError> {
        let compiled = Regex::new(pattern).map_err(|e| RegexError(e.to_string()))?;
        Ok(RegexData { pattern: pattern.to_string(), compiled })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.compiled.is_match(haystack)
    }

    /// First match's start/end codepoint-adjacent byte offsets, mirroring
    /// the original's `match` returning a capture-position pair rather
    /// than the substring itself.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        self.compiled.find(haystack).map(|m| (m.start(), m.end()))
    }

    pub fn captures(&self, haystack: &str) -> Option<Vec<Option<String>>> {
        let caps = self.compiled.captures(haystack)?;
        Some(caps.iter().map(|m| m.map(|m| m.as_str().to_string())).collect())
    }

    pub fn replace_all(&self, haystack: &str, replacement: &str) -> String {
        self.compiled.replace_all(haystack, replacement).into_owned()
    }
}

impl PartialEq for RegexData {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
impl Eq for RegexData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_matches() {
        let re = RegexData::compile(r"^\d+$").unwrap();
        assert!(re.is_match("123"));
        assert!(!re.is_match("12a"));
    }

    #[test]
    fn invalid_pattern_reports_error() {
        let err = RegexData::compile("(").unwrap_err();
        assert!(!err.0.is_empty());
    }

    #[test]
    fn find_reports_byte_offsets() {
        let re = RegexData::compile(r"b+").unwrap();
        let (start, end) = re.find("abbbc").unwrap();
        assert_eq!(&"abbbc"[start..end], "bbb");
    }
}
