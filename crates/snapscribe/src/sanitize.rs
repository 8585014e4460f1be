//! Redaction helpers for values that end up in span fields and log lines.
//!
//! Upload references embed owner ids and session tokens, and endpoints can
//! carry credentials in their userinfo or query string.

use crate::job::ImageRef;

/// Final segment of an image reference, without directories or query.
pub fn redact_ref(image: &ImageRef) -> String {
    match image.file_name() {
        "" => "<unknown>".to_string(),
        name => name.to_string(),
    }
}

/// Endpoint URL with userinfo masked and the query string dropped.
///
/// - `https://key@llm.example.com/v1` -> `https://****@llm.example.com/v1`
/// - `https://llm.example.com/v1?key=abc` -> `https://llm.example.com/v1`
pub fn redact_endpoint(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let (scheme, rest) = without_query.split_at(scheme_end + 3);
        let authority_end = rest.find('/').unwrap_or(rest.len());
        if let Some(at) = rest[..authority_end].rfind('@') {
            return format!("{}****@{}", scheme, &rest[at + 1..]);
        }
    }

    without_query.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_ref_keeps_only_file_name() {
        assert_eq!(
            redact_ref(&"/srv/uploads/owner-42/5f1c/0007_shot.png".into()),
            "0007_shot.png"
        );
        assert_eq!(
            redact_ref(&"https://cdn.example.com/u/1.png?token=secret".into()),
            "1.png"
        );
    }

    #[test]
    fn test_redact_ref_trailing_separator() {
        assert_eq!(redact_ref(&"uploads/owner/".into()), "<unknown>");
    }

    #[test]
    fn test_redact_endpoint_userinfo() {
        assert_eq!(
            redact_endpoint("https://sk-xxxx@llm.example.com/v1"),
            "https://****@llm.example.com/v1"
        );
    }

    #[test]
    fn test_redact_endpoint_query() {
        assert_eq!(
            redact_endpoint("https://llm.example.com/v1?api-key=abc"),
            "https://llm.example.com/v1"
        );
    }

    #[test]
    fn test_redact_endpoint_plain() {
        assert_eq!(
            redact_endpoint("http://localhost:11434/v1"),
            "http://localhost:11434/v1"
        );
    }

    #[test]
    fn test_at_sign_in_path_is_not_userinfo() {
        assert_eq!(
            redact_endpoint("https://llm.example.com/v1/@models"),
            "https://llm.example.com/v1/@models"
        );
    }
}
