//! Header list parsing and Http-Header-Case normalization. Grounded in
//! `original_source/src/core/httputil.cc` — `HTTPHeaders::parse` (line
//! continuations, colon split) and `normalize_name` (the already-normalized
//! fast path plus the process-wide cache).

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn already_normalized() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][a-z0-9]*(-[A-Z0-9][a-z0-9]*)*$").unwrap())
}

fn normalize_cache() -> &'static Mutex<HashMap<String, String>> {
    static CACHE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Normalize a header name to Http-Header-Case, caching the result
/// process-wide (normalization is pure and names repeat heavily).
pub fn normalize_name(name: &str) -> String {
    if let Some(hit) = normalize_cache().lock().unwrap().get(name) {
        return hit.clone();
    }
    let normalized = if already_normalized().is_match(name) {
        name.to_string()
    } else {
        name.split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    };
    normalize_cache().lock().unwrap().insert(name.to_string(), normalized.clone());
    normalized
}

/// An ordered header multimap, keyed by normalized name. Duplicate `add`s
/// join with a single comma.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn add(&mut self, name: &str, value: &str) {
        let norm = normalize_name(name);
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == norm) {
            existing.1 = format!("{},{}", existing.1, value);
        } else {
            self.entries.push((norm, value.to_string()));
        }
    }

    pub fn set(&mut self, name: &str, value: &str) {
        let norm = normalize_name(name);
        self.entries.retain(|(k, _)| *k != norm);
        self.entries.push((norm, value.to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let norm = normalize_name(name);
        self.entries.iter().find(|(k, _)| *k == norm).map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    /// Parse a CRLF-delimited header block (request-line already stripped).
    pub fn parse(raw: &str) -> Result<Headers, String> {
        let mut headers = Headers::new();
        let mut last_name: Option<String> = None;
        for line in raw.split("\r\n") {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                let Some(name) = &last_name else {
                    return Err("header continuation with no preceding header".to_string());
                };
                let trimmed = line.trim();
                if let Some(existing) = headers.entries.iter_mut().rev().find(|(k, _)| k == name) {
                    existing.1 = format!("{} {}", existing.1, trimmed);
                }
                continue;
            }
            let Some(idx) = line.find(':') else {
                return Err(format!("malformed header line: {line}"));
            };
            let name = line[..idx].trim();
            let value = line[idx + 1..].trim();
            headers.add(name, value);
            last_name = Some(normalize_name(name));
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for name in ["content-type", "CONTENT-TYPE", "Content-Type", "X-Real-Ip"] {
            let once = normalize_name(name);
            let twice = normalize_name(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_title_cases_hyphenated_tokens() {
        assert_eq!(normalize_name("content-type"), "Content-Type");
        assert_eq!(normalize_name("x-real-ip"), "X-Real-Ip");
    }

    #[test]
    fn parse_joins_continuation_lines() {
        let raw = "X-Custom: first\r\n second\r\n";
        let headers = Headers::parse(raw).unwrap();
        assert_eq!(headers.get("X-Custom"), Some("first second"));
    }

    #[test]
    fn parse_joins_duplicate_headers_with_comma() {
        let raw = "Accept: text/html\r\nAccept: application/json\r\n";
        let headers = Headers::parse(raw).unwrap();
        assert_eq!(headers.get("Accept"), Some("text/html,application/json"));
    }

    #[test]
    fn parse_rejects_line_without_colon() {
        assert!(Headers::parse("garbage\r\n").is_err());
    }
}
