//! Mapping of SDK failures onto the loft error taxonomy

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use loft_core::Error;

/// Classify an S3 error code and HTTP status
pub(crate) fn classify(code: Option<&str>, status: Option<u16>, message: String) -> Error {
    match code {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchUpload") => {
            return Error::NotFound(message);
        }
        Some(
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "Forbidden"
            | "ExpiredToken" | "InvalidToken",
        ) => return Error::AccessDenied(message),
        Some(
            "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
            | "TooManyRequests" | "RequestThrottled",
        ) => return Error::RateLimited(message),
        _ => {}
    }

    match status {
        Some(404) => Error::NotFound(message),
        Some(401 | 403) => Error::AccessDenied(message),
        Some(429 | 503) => Error::RateLimited(message),
        _ => Error::Remote(message),
    }
}

/// Convert an SDK error for the object at `target`
pub(crate) fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, target: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = format!("{target}: {}", DisplayErrorContext(&err));
    let mapped = classify(code.as_deref(), status, message);
    tracing::debug!(target, ?code, ?status, "S3 call failed: {mapped}");
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(code: Option<&str>, status: Option<u16>) -> Error {
        classify(code, status, "b/k".into())
    }

    #[test]
    fn test_codes_take_precedence() {
        assert!(matches!(kind(Some("NoSuchKey"), Some(400)), Error::NotFound(_)));
        assert!(matches!(kind(Some("SlowDown"), Some(503)), Error::RateLimited(_)));
        assert!(matches!(
            kind(Some("SignatureDoesNotMatch"), Some(403)),
            Error::AccessDenied(_)
        ));
    }

    #[test]
    fn test_status_fallback() {
        // HEAD responses carry no body, so only the status is known
        assert!(matches!(kind(None, Some(404)), Error::NotFound(_)));
        assert!(matches!(kind(None, Some(403)), Error::AccessDenied(_)));
        assert!(matches!(kind(None, Some(503)), Error::RateLimited(_)));
        assert!(matches!(kind(Some("InternalError"), Some(500)), Error::Remote(_)));
        assert!(matches!(kind(None, None), Error::Remote(_)));
    }

    #[test]
    fn test_rate_limits_are_retryable() {
        assert!(kind(Some("Throttling"), None).is_retryable());
        assert!(!kind(None, Some(500)).is_retryable());
    }
}
