//! `Cookie` header parsing and `Set-Cookie` value quoting. Grounded in
//! `original_source/src/lib/cookie.cc` — the `_cookie_pattern` token/quoted-
//! string/email-date alternation, the `_reserved` attribute set, and the
//! `_quote`/`_unquote` octal-escape scheme.

use regex::Regex;
use std::sync::OnceLock;

const RESERVED: &[&str] =
    &["expires", "path", "comment", "domain", "max-age", "secure", "httponly", "version"];

fn cookie_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // token | quoted-string | the legacy `expires=` email-date form.
        Regex::new(
            r#"(?x)
            (?P<key>[A-Za-z0-9!\#$%&'*+\-.^_`|~]+)
            \s*=\s*
            (?P<val>
                "(?:[^"\\]|\\.)*"
              | [A-Za-z]{3},\s[A-Za-z0-9\s:-]+GMT
              | [A-Za-z0-9!\#$%&'*+\-.^_`|~]*
            )
            "#,
        )
        .unwrap()
    })
}

fn is_legal_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Parse a raw `Cookie` header into an ordered list of (name, value) pairs,
/// skipping reserved attribute names.
pub fn parse(header: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for caps in cookie_pattern().captures_iter(header) {
        let key = &caps["key"];
        if RESERVED.contains(&key.to_ascii_lowercase().as_str()) {
            continue;
        }
        let raw_val = &caps["val"];
        out.push((key.to_string(), unquote(raw_val)));
    }
    out
}

/// Undo `quote`: strip surrounding quotes and resolve `\ooo` octal escapes
/// and `\\`/`\"`.
pub fn unquote(value: &str) -> String {
    let stripped = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
    let bytes = stripped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let next = bytes[i + 1];
            if next.is_ascii_digit() && i + 4 <= bytes.len() {
                if let Ok(v) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or(""), 8) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
            out.push(next);
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Quote a `Set-Cookie` value: wrap in `"..."` and `\ooo`-escape any byte
/// that isn't a legal bare token character, if any such byte is present.
pub fn quote(value: &str) -> String {
    if value.bytes().all(is_legal_token_char) && !value.is_empty() {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for b in value.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b if is_legal_token_char(b) => out.push(b as char),
            b => out.push_str(&format!("\\{b:03o}")),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let pairs = parse("a=1; b=2");
        assert_eq!(pairs, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn skips_reserved_attributes() {
        let pairs = parse("a=1; Path=/; Secure");
        assert_eq!(pairs.iter().find(|(k, _)| k.eq_ignore_ascii_case("path")), None);
    }

    #[test]
    fn round_trips_token_values() {
        let value = "plain-token_value";
        assert_eq!(unquote(&quote(value)), value);
        assert_eq!(quote(value), value);
    }

    #[test]
    fn round_trips_values_needing_octal_escapes() {
        let value = "a,b;c";
        let quoted = quote(value);
        assert!(quoted.starts_with('"') && quoted.ends_with('"'));
        assert_eq!(unquote(&quoted), value);
    }
}
