//! Small helpers shared by the remote client, the engine and the CLI.

/// Longest remote error body carried into a `RemoteError`
pub const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed text, or `None` when nothing is left
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn has_http_scheme(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

/// First few characters of a remote error body, for log lines and statuses
pub fn error_excerpt(body: &str) -> String {
    body.trim().chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Wall clock in Unix milliseconds; every queue, cache and status timestamp
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_non_empty_drops_blank_version_headers() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("  \t".to_string())), None);
        assert_eq!(non_empty(Some(" \"v3\" ".to_string())), Some("\"v3\"".to_string()));
    }

    #[test]
    fn test_has_http_scheme_for_remote_urls() {
        assert!(has_http_scheme("https://api.example.com/v1"));
        assert!(has_http_scheme("http://localhost:8080"));
        assert!(!has_http_scheme("api.example.com"));
        assert!(!has_http_scheme("ws://example.com"));
    }

    #[test]
    fn test_error_excerpt_bounds_long_bodies() {
        let body = format!("  {}", "e".repeat(1_000));
        assert_eq!(error_excerpt(&body).chars().count(), ERROR_EXCERPT_CHARS);
        assert_eq!(error_excerpt(" payload rejected \n"), "payload rejected");
    }
}
