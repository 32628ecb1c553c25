//! Request-line parsing, the Content-Type parameter grammar, and the
//! `multipart/form-data` decomposer. Grounded in
//! `original_source/src/core/httpserver.cc` (`HTTPConnection::on_headers`)
//! and `httputil.cc` (`_parse_header`/`_parse_param`,
//! `parse_multipart_form_data`).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Connect,
    Trace,
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            "CONNECT" => Ok(Method::Connect),
            "TRACE" => Ok(Method::Trace),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        };
        f.write_str(s)
    }
}

pub struct RequestLine {
    pub method: Method,
    pub uri: String,
    pub version: String,
}

/// Split the request line into exactly three whitespace-separated tokens;
/// the version must begin with `HTTP/`.
pub fn parse_request_line(line: &str) -> Result<RequestLine, String> {
    let mut parts = line.trim_end_matches("\r\n").splitn(3, ' ');
    let (Some(method_tok), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("malformed request line: {line:?}"));
    };
    if parts.next().is_some() {
        return Err(format!("malformed request line: {line:?}"));
    }
    if !version.starts_with("HTTP/") {
        return Err(format!("unsupported version: {version:?}"));
    }
    let method = Method::from_str(method_tok).map_err(|_| format!("unsupported method: {method_tok:?}"))?;
    Ok(RequestLine { method, uri: uri.to_string(), version: version.to_string() })
}

/// Split a `Content-Type`-style header into its main value and a lowercased
/// parameter map, respecting quoted strings so `;` inside a quoted value
/// doesn't split the segment.
pub fn parse_header_params(raw: &str) -> (String, HashMap<String, String>) {
    let segments = split_respecting_quotes(raw, ';');
    let mut iter = segments.into_iter();
    let main = iter.next().unwrap_or_default().trim().to_string();
    let mut params = HashMap::new();
    for segment in iter {
        let segment = segment.trim();
        let Some(eq) = segment.find('=') else { continue };
        let name = segment[..eq].trim().to_ascii_lowercase();
        let value = unescape_param_value(segment[eq + 1..].trim());
        params.insert(name, value);
    }
    (main, params)
}

fn split_respecting_quotes(raw: &str, sep: char) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c == sep && !in_quotes => {
                segments.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn unescape_param_value(value: &str) -> String {
    let stripped = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
    let mut out = String::with_capacity(stripped.len());
    let mut chars = stripped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// A decoded multipart body, split into form fields and file uploads.
#[derive(Debug, Default)]
pub struct MultipartBody {
    pub arguments: Vec<(String, String)>,
    pub files: Vec<MultipartFile>,
}

#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub name: String,
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Split `body` on `"--" + boundary + "\r\n"` up to the required final
/// `"--" + boundary + "--"`. Parts without a trailing `\r\n` before the next
/// boundary are silently skipped, matching the source's documented quirk.
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<MultipartBody, String> {
    let delimiter = format!("--{boundary}\r\n").into_bytes();
    let closing = format!("--{boundary}--", boundary = boundary).into_bytes();

    let Some(close_pos) = find_subsequence(body, &closing) else {
        return Err("multipart body missing final boundary".to_string());
    };
    let framed = &body[..close_pos];

    let mut result = MultipartBody::default();
    let mut search_from = 0usize;
    let mut part_starts = Vec::new();
    while let Some(pos) = find_subsequence(&framed[search_from..], &delimiter) {
        let absolute = search_from + pos;
        part_starts.push(absolute + delimiter.len());
        search_from = absolute + delimiter.len();
    }

    for (i, &start) in part_starts.iter().enumerate() {
        let end = if i + 1 < part_starts.len() {
            // Back up over the boundary marker ("--boundary\r\n") that
            // precedes the next part.
            part_starts[i + 1] - delimiter.len()
        } else {
            framed.len()
        };
        if end < start {
            continue;
        }
        let raw_part = &framed[start..end];
        // must end in \r\n immediately before the boundary; parts without it
        // are skipped.
        let Some(trimmed) = raw_part.strip_suffix(b"\r\n") else { continue };
        let Some(header_end) = find_subsequence(trimmed, b"\r\n\r\n") else { continue };
        let header_block = std::str::from_utf8(&trimmed[..header_end]).unwrap_or_default();
        let value = &trimmed[header_end + 4..];

        let part_headers = match crate::http::headers::Headers::parse(header_block) {
            Ok(h) => h,
            Err(_) => continue,
        };
        let Some(disposition) = part_headers.get("Content-Disposition") else { continue };
        let (kind, params) = parse_header_params(disposition);
        if kind != "form-data" {
            continue;
        }
        let Some(name) = params.get("name") else { continue };
        match params.get("filename") {
            Some(filename) => {
                let content_type =
                    part_headers.get("Content-Type").unwrap_or("application/unknown").to_string();
                result.files.push(MultipartFile {
                    name: name.clone(),
                    filename: filename.clone(),
                    content_type,
                    body: value.to_vec(),
                });
            }
            None => {
                result.arguments.push((name.clone(), String::from_utf8_lossy(value).into_owned()));
            }
        }
    }
    Ok(result)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse `application/x-www-form-urlencoded` body bytes into ordered pairs.
pub fn parse_urlencoded(body: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(body);
    crate::url::Query::parse(&text).iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line_accepts_well_formed_line() {
        let line = parse_request_line("GET /x HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.uri, "/x");
        assert_eq!(line.version, "HTTP/1.1");
    }

    #[test]
    fn parse_request_line_rejects_wrong_token_count() {
        assert!(parse_request_line("GET /x").is_err());
        assert!(parse_request_line("GET /x HTTP/1.1 extra").is_err());
    }

    #[test]
    fn parse_request_line_rejects_bad_version() {
        assert!(parse_request_line("GET /x FTP/1.1").is_err());
    }

    #[test]
    fn parse_header_params_splits_on_unquoted_semicolons() {
        let (main, params) = parse_header_params(r#"multipart/form-data; boundary="A;B""#);
        assert_eq!(main, "multipart/form-data");
        assert_eq!(params.get("boundary").unwrap(), "A;B");
    }

    #[test]
    fn parse_multipart_extracts_fields_and_files() {
        let body = b"--AaB03x\r\n\
Content-Disposition: form-data; name=\"submit-name\"\r\n\
\r\n\
Larry\r\n\
--AaB03x\r\n\
Content-Disposition: form-data; name=\"files\"; filename=\"file1.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
... contents ...\r\n\
--AaB03x--";
        let parsed = parse_multipart(body, "AaB03x").unwrap();
        assert_eq!(parsed.arguments, vec![("submit-name".to_string(), "Larry".to_string())]);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].filename, "file1.txt");
        assert_eq!(parsed.files[0].content_type, "text/plain");
        assert_eq!(parsed.files[0].body, b"... contents ...");
    }

    #[test]
    fn parse_multipart_requires_final_boundary() {
        let body = b"--AaB03x\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n";
        assert!(parse_multipart(body, "AaB03x").is_err());
    }

    #[test]
    fn parse_urlencoded_builds_ordered_pairs_with_repeats() {
        let pairs = parse_urlencoded(b"a=1&b=2&a=3");
        assert_eq!(
            pairs,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string()), ("a".to_string(), "3".to_string())]
        );
    }
}
