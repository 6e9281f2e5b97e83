// Error classification ingress. Upstream error text is ground truth, so
// all substring matching lives here; the dispatch loop only ever sees the
// resulting ErrorKind.
use crate::error::ErrorKind;
use once_cell::sync::Lazy;
use regex::Regex;

static PROJECT_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)resource projects/\S+ could not be found").expect("project-not-found regex")
});

pub fn classify_upstream_error(status: Option<u16>, message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();

    if matches!(status, Some(401) | Some(403))
        || lower.contains("unauthorized")
        || lower.contains("invalid_grant")
        || lower.contains("permission_denied")
        || lower.contains("forbidden")
    {
        return ErrorKind::Forbidden;
    }

    if status == Some(429)
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
    {
        return ErrorKind::RateLimited;
    }

    let transient_status = matches!(status, Some(s) if s == 408 || (500..=599).contains(&s));
    if transient_status
        || lower.contains("socket hang up")
        || lower.contains("timeout")
        || lower.contains("empty response stream")
        || lower.contains("connection reset")
    {
        return ErrorKind::Transient;
    }

    if status == Some(400) {
        return ErrorKind::BadRequest;
    }

    ErrorKind::Fatal
}

// Gemini project licensing / not-found family: recoverable by retrying
// the same account with an empty project.
pub fn is_project_context_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("#3501")
        || (lower.contains("google cloud project") && lower.contains("code assist license"))
        || PROJECT_NOT_FOUND.is_match(&lower)
        || (lower.contains("project") && lower.contains("not found"))
}

// Quota family that the Anthropic surface answers with a model downgrade.
pub fn is_quota_exhausted_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("resource has been exhausted")
        || lower.contains("resource_exhausted")
        || lower.contains("quota")
}

// Transport-level stream failures as user-presentable pairs; never leaks
// the reqwest error chain.
pub fn classify_stream_error(error: &reqwest::Error) -> (&'static str, &'static str) {
    if error.is_timeout() {
        ("timeout_error", "Request timeout, please check your network connection")
    } else if error.is_connect() {
        (
            "connection_error",
            "Connection failed, please check your network or proxy settings",
        )
    } else if error.is_decode() {
        (
            "decode_error",
            "Network unstable, data transmission interrupted",
        )
    } else if error.is_body() {
        ("stream_error", "Stream transmission error, please retry later")
    } else {
        ("unknown_error", "Unknown error occurred")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_family() {
        assert_eq!(classify_upstream_error(Some(401), ""), ErrorKind::Forbidden);
        assert_eq!(classify_upstream_error(Some(403), ""), ErrorKind::Forbidden);
        assert_eq!(
            classify_upstream_error(None, "OAuth invalid_grant returned"),
            ErrorKind::Forbidden
        );
        assert_eq!(
            classify_upstream_error(None, "PERMISSION_DENIED on resource"),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn rate_limit_family() {
        assert_eq!(
            classify_upstream_error(Some(429), "anything"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_upstream_error(None, "RESOURCE_EXHAUSTED: slow down"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_upstream_error(Some(200), "Quota exceeded for model"),
            ErrorKind::RateLimited
        );
    }

    #[test]
    fn transient_family() {
        for status in [408u16, 500, 502, 503, 504] {
            assert_eq!(
                classify_upstream_error(Some(status), ""),
                ErrorKind::Transient,
                "status {}",
                status
            );
        }
        assert_eq!(
            classify_upstream_error(None, "socket hang up"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_upstream_error(None, "Empty response stream"),
            ErrorKind::Transient
        );
        assert_eq!(
            classify_upstream_error(None, "connection reset by peer"),
            ErrorKind::Transient
        );
    }

    #[test]
    fn bad_request_and_fatal() {
        assert_eq!(
            classify_upstream_error(Some(400), "invalid argument"),
            ErrorKind::BadRequest
        );
        assert_eq!(
            classify_upstream_error(Some(418), "teapot"),
            ErrorKind::Fatal
        );
        assert_eq!(classify_upstream_error(None, "weird"), ErrorKind::Fatal);
    }

    #[test]
    fn project_context_patterns() {
        assert!(is_project_context_error("Error #3501 from backend"));
        assert!(is_project_context_error(
            "Your Google Cloud Project is missing a Code Assist License"
        ));
        assert!(is_project_context_error(
            "Resource projects/cloud-code-123 could not be found"
        ));
        assert!(is_project_context_error("project proj-x was not found"));
        assert!(!is_project_context_error("quota exceeded"));
    }

    #[test]
    fn quota_exhausted_patterns() {
        assert!(is_quota_exhausted_error(
            "Resource has been exhausted (e.g. check quota)"
        ));
        assert!(is_quota_exhausted_error("RESOURCE_EXHAUSTED"));
        assert!(is_quota_exhausted_error("Daily quota reached"));
        assert!(!is_quota_exhausted_error("permission denied"));
    }
}
