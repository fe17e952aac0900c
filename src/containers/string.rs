//! Builtin String container: indexing walks grapheme clusters rather
//! than raw bytes, so multi-byte codepoints count as one position.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringData {
    pub value: String,
}

impl StringData {
    pub fn new(value: impl Into<String>) -> Self {
        StringData { value: value.into() }
    }

    /// Number of codepoints (not bytes, not grapheme clusters) — the unit
    /// the original's UTF-8 iterator walks.
    pub fn codepoint_len(&self) -> usize {
        self.value.chars().count()
    }

    /// B2: codepoint-atomic indexing. Negative indices count from the end,
    /// matching the language's array/string subscript convention.
    pub fn codepoint_at(&self, index: i64) -> Option<char> {
        let len = self.codepoint_len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            return None;
        }
        self.value.chars().nth(idx as usize)
    }

    pub fn concat(&self, other: &StringData) -> StringData {
        StringData::new(format!("{}{}", self.value, other.value))
    }

    pub fn graphemes(&self) -> Vec<&str> {
        self.value.graphemes(true).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codepoint_indexing_is_utf8_aware() {
        let s = StringData::new("a\u{00e9}b"); // "aéb" — é is one codepoint, two bytes
        assert_eq!(s.codepoint_len(), 3);
        assert_eq!(s.codepoint_at(1), Some('\u{00e9}'));
        assert_eq!(s.codepoint_at(-1), Some('b'));
        assert_eq!(s.codepoint_at(3), None);
    }

    #[test]
    fn concat_matches_plus_operator_semantics() {
        let a = StringData::new("foo");
        let b = StringData::new("bar");
        assert_eq!(a.concat(&b).value, "foobar");
    }
}
