//! Case-insensitive header list used on the upstream edge.

pub type Headers = Vec<(String, String)>;

fn find_index(headers: &Headers, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|(key, _)| key.eq_ignore_ascii_case(name))
}

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match find_index(headers, &name) {
        Some(idx) => headers[idx].1 = value,
        None => headers.push((name, value)),
    }
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let idx = find_index(headers, name)?;
    Some(headers[idx].1.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let idx = find_index(headers, name)?;
    Some(headers.remove(idx).1)
}

/// Hop-by-hop headers stripped before mirroring an upstream response.
pub const HOP_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "content-encoding",
];

pub fn strip_hop_headers(headers: &mut Headers) {
    headers.retain(|(name, _)| !HOP_HEADERS.iter().any(|hop| name.eq_ignore_ascii_case(hop)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut headers: Headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        header_set(&mut headers, "content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(header_get(&headers, "CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn remove_returns_the_value() {
        let mut headers: Headers = vec![("X-Trace".to_string(), "abc".to_string())];
        assert_eq!(header_remove(&mut headers, "x-trace"), Some("abc".to_string()));
        assert!(headers.is_empty());
        assert_eq!(header_remove(&mut headers, "x-trace"), None);
    }

    #[test]
    fn hop_headers_are_stripped() {
        let mut headers: Headers = vec![
            ("Content-Length".to_string(), "42".to_string()),
            ("x-request-id".to_string(), "abc".to_string()),
            ("Transfer-Encoding".to_string(), "chunked".to_string()),
        ];
        strip_hop_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "x-request-id");
    }
}
