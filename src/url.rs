//! Bespoke URL splitter and query parser — not RFC 3986, matching the
//! simplified algorithm in `original_source/src/lib/urllib.cc`
//! (`URL::split`/`unsplit`/`split_netloc`, `Query::parse`/`parse_extend`).

fn is_scheme_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'+' || c == b'-' || c == b'.'
}

/// `{scheme, netloc, path, query, fragment}`, matching the five-tuple the
/// original splitter produces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitUrl {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

const USES_NETLOC: &[&str] = &["", "http", "https", "ftp", "ws", "wss"];

fn uses_netloc(scheme: &str) -> bool {
    USES_NETLOC.contains(&scheme)
}

/// Split a URL. `allow_fragments` disables `#` splitting when false.
pub fn split(url: &str, allow_fragments: bool) -> SplitUrl {
    let mut rest = url;
    let mut scheme = String::new();

    if let Some(colon) = rest.find(':') {
        let candidate = &rest[..colon];
        if !candidate.is_empty() && candidate.bytes().all(is_scheme_char) && candidate.as_bytes()[0].is_ascii_alphabetic()
        {
            scheme = candidate.to_ascii_lowercase();
            rest = &rest[colon + 1..];
        }
    }

    let mut netloc = String::new();
    if rest.starts_with("//") {
        let after = &rest[2..];
        let end = after.find(|c| c == '/' || c == '?' || c == '#').unwrap_or(after.len());
        netloc = after[..end].to_string();
        rest = &after[end..];
    }

    let mut fragment = String::new();
    if allow_fragments {
        if let Some(hash) = rest.find('#') {
            fragment = rest[hash + 1..].to_string();
            rest = &rest[..hash];
        }
    }

    let mut query = String::new();
    let path;
    if let Some(qmark) = rest.find('?') {
        query = rest[qmark + 1..].to_string();
        path = rest[..qmark].to_string();
    } else {
        path = rest.to_string();
    }

    SplitUrl { scheme, netloc, path, query, fragment }
}

/// Reassemble a `SplitUrl`, inverse of `split` for URLs it recognizes.
pub fn unsplit(parts: &SplitUrl) -> String {
    let mut url = String::new();
    let mut rest = format!("{}{}", parts.path, if parts.query.is_empty() { String::new() } else { format!("?{}", parts.query) });

    if !parts.netloc.is_empty() || (uses_netloc(&parts.scheme) && !rest.starts_with("//")) {
        if !rest.is_empty() && !rest.starts_with('/') {
            rest = format!("/{rest}");
        }
        rest = format!("//{}{}", parts.netloc, rest);
    }
    if !parts.scheme.is_empty() {
        url.push_str(&parts.scheme);
        url.push(':');
    }
    url.push_str(&rest);
    if !parts.fragment.is_empty() {
        url.push('#');
        url.push_str(&parts.fragment);
    }
    url
}

/// An ordered multimap preserving repeated keys, as produced by `Query::parse`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    entries: Vec<(String, String)>,
}

impl Query {
    pub fn parse(raw: &str) -> Self {
        let mut q = Query::default();
        q.parse_extend(raw);
        q
    }

    /// Append more `&`-separated pairs onto an existing multimap.
    pub fn parse_extend(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        for token in raw.split('&') {
            if token.is_empty() {
                continue;
            }
            match token.find('=') {
                Some(eq) => {
                    let key = &token[..eq];
                    let value = &token[eq + 1..];
                    if !value.is_empty() {
                        self.entries.push((decode_component(key), decode_component(value)));
                    }
                }
                None => {
                    // A bare token with no `=` carries no value; dropped per
                    // the "empty-value tokens are dropped" rule.
                }
            }
        }
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }

    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_recognizes_scheme_netloc_path_query_fragment() {
        let parts = split("http://example.com/a/b?x=1&y=2#frag", true);
        assert_eq!(parts.scheme, "http");
        assert_eq!(parts.netloc, "example.com");
        assert_eq!(parts.path, "/a/b");
        assert_eq!(parts.query, "x=1&y=2");
        assert_eq!(parts.fragment, "frag");
    }

    #[test]
    fn split_without_scheme_is_a_bare_path() {
        let parts = split("/a/b?x=1", true);
        assert_eq!(parts.scheme, "");
        assert_eq!(parts.netloc, "");
        assert_eq!(parts.path, "/a/b");
        assert_eq!(parts.query, "x=1");
    }

    #[test]
    fn unsplit_is_the_inverse_of_split() {
        let url = "http://example.com/a/b?x=1#frag";
        let parts = split(url, true);
        assert_eq!(unsplit(&parts), url);
    }

    #[test]
    fn query_parse_preserves_repeated_keys_in_order() {
        let q = Query::parse("a=1&b=2&a=3");
        assert_eq!(q.get_all("a"), vec!["1", "3"]);
        assert_eq!(q.get_all("b"), vec!["2"]);
    }

    #[test]
    fn query_parse_drops_empty_value_tokens() {
        let q = Query::parse("a=&b=2&noeq");
        assert_eq!(q.get_all("a"), Vec::<&str>::new());
        assert_eq!(q.get_all("b"), vec!["2"]);
    }
}
