//! Narrow regex wrapper matching the interface ctornado's `Regex`/`RegexMatch`
//! expose to `IOStream::read_until_regex`: compile once, then execute against
//! a haystack and report only the end offset of the whole match (capture 0).

use regex::bytes::Regex;

#[derive(Clone)]
pub struct CompiledRegex(Regex);

impl CompiledRegex {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        Regex::new(pattern).map(CompiledRegex).map_err(|e| e.to_string())
    }

    /// End offset of the first match's capture 0, if any.
    pub fn exec(&self, haystack: &[u8]) -> Option<usize> {
        self.0.find(haystack).map(|m| m.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_returns_end_of_whole_match() {
        let re = CompiledRegex::compile(r"\r\n\r\n").unwrap();
        assert_eq!(re.exec(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
    }

    #[test]
    fn exec_none_when_absent() {
        let re = CompiledRegex::compile(r"\r\n\r\n").unwrap();
        assert_eq!(re.exec(b"partial\r\n"), None);
    }

    #[test]
    fn compile_rejects_invalid_pattern() {
        assert!(CompiledRegex::compile("(").is_err());
    }
}
