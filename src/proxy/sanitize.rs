//! Header sanitization for journal entries.
//!
//! Headers are stored with structure intact; credential-bearing values
//! are masked down to a prefix/suffix that still allows correlating keys
//! across entries without disclosing them.

use std::collections::HashMap;

use axum::http::HeaderMap;

/// Header names whose values are masked, lowercase.
const SENSITIVE_HEADERS: [&str; 8] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "x-csrf-token",
    "proxy-authorization",
];

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Copy headers into the journal's multi-valued map, masking sensitive
/// values.
pub fn sanitize_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for name in headers.keys() {
        let sensitive = is_sensitive(name.as_str());
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| {
                let raw = String::from_utf8_lossy(v.as_bytes()).into_owned();
                if sensitive {
                    mask_sensitive_value(&raw)
                } else {
                    raw
                }
            })
            .collect();
        out.insert(name.as_str().to_string(), values);
    }
    out
}

/// Sanitize response headers, dropping Content-Encoding when the stored
/// body was decompressed (the journal body no longer matches it).
pub fn sanitize_response_headers(
    headers: &HeaderMap,
    body_was_decompressed: bool,
) -> HashMap<String, Vec<String>> {
    let mut sanitized = sanitize_headers(headers);
    if body_was_decompressed {
        sanitized.remove("content-encoding");
    }
    sanitized
}

/// Mask one sensitive value, keeping enough shape for debugging.
pub fn mask_sensitive_value(value: &str) -> String {
    if value.is_empty() {
        return "[EMPTY]".into();
    }

    if value.starts_with("Bearer ") || value.starts_with("bearer ") {
        let token = &value[7..];
        if token.chars().count() <= 8 {
            return "Bearer [REDACTED]".into();
        }
        return format!("Bearer {}...{}", head(token, 3), tail(token, 4));
    }

    if value.chars().count() <= 8 {
        return "[REDACTED]".into();
    }
    format!("{}...{}", head(value, 3), tail(value, 4))
}

fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_keeps_prefix_and_suffix() {
        assert_eq!(
            mask_sensitive_value("Bearer sk-proj-1234567890abcdefghijklmnop"),
            "Bearer sk-...mnop"
        );
    }

    #[test]
    fn lowercase_bearer_is_recognized() {
        assert_eq!(
            mask_sensitive_value("bearer sk-proj-1234567890abcdefghijklmnop"),
            "Bearer sk-...mnop"
        );
    }

    #[test]
    fn short_bearer_token_is_fully_redacted() {
        assert_eq!(mask_sensitive_value("Bearer 12345678"), "Bearer [REDACTED]");
    }

    #[test]
    fn short_raw_value_is_fully_redacted() {
        assert_eq!(mask_sensitive_value("secret12"), "[REDACTED]");
    }

    #[test]
    fn long_raw_value_keeps_prefix_and_suffix() {
        assert_eq!(mask_sensitive_value("sessionid-abcdef"), "ses...cdef");
    }

    #[test]
    fn empty_value_is_marked_empty() {
        assert_eq!(mask_sensitive_value(""), "[EMPTY]");
    }

    #[test]
    fn sensitive_names_match_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer sk-12345678901234567890"));
        headers.insert("X-API-Key", HeaderValue::from_static("key-0123456789"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["authorization"], vec!["Bearer sk-...7890"]);
        assert_eq!(sanitized["x-api-key"], vec!["key...6789"]);
        // Non-sensitive values pass through unchanged.
        assert_eq!(sanitized["content-type"], vec!["application/json"]);
    }

    #[test]
    fn multi_valued_headers_mask_each_value() {
        let mut headers = HeaderMap::new();
        headers.append("cookie", HeaderValue::from_static("short"));
        headers.append("cookie", HeaderValue::from_static("long-cookie-value-here"));

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["cookie"], vec!["[REDACTED]", "lon...here"]);
    }

    #[test]
    fn content_encoding_removed_only_after_decompression() {
        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let kept = sanitize_response_headers(&headers, false);
        assert!(kept.contains_key("content-encoding"));

        let dropped = sanitize_response_headers(&headers, true);
        assert!(!dropped.contains_key("content-encoding"));
        assert!(dropped.contains_key("content-type"));
    }
}
