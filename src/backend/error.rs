//! Provider error taxonomy and failure classification.
//!
//! Distinguishes between failures the caller can recover from (retry later,
//! pick another model) and permanent ones (install or log in first).
//! Cancellation is never represented here.

use serde::Serialize;
use thiserror::Error;

/// Stable, caller-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotInstalled,
    NotAuthenticated,
    RateLimited,
    ModelUnavailable,
    NetworkError,
    ProcessCrashed,
    Timeout,
    Unknown,
}

impl ErrorCode {
    /// Whether retrying the same request later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::NetworkError
                | ErrorCode::ProcessCrashed
                | ErrorCode::Timeout
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::NotInstalled => write!(f, "NOT_INSTALLED"),
            ErrorCode::NotAuthenticated => write!(f, "NOT_AUTHENTICATED"),
            ErrorCode::RateLimited => write!(f, "RATE_LIMITED"),
            ErrorCode::ModelUnavailable => write!(f, "MODEL_UNAVAILABLE"),
            ErrorCode::NetworkError => write!(f, "NETWORK_ERROR"),
            ErrorCode::ProcessCrashed => write!(f, "PROCESS_CRASHED"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Terminal error for one execution.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Raw captured stderr, kept for `Unknown` failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.is_recoverable(),
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        if !details.trim().is_empty() {
            self.details = Some(details);
        }
        self
    }

    pub fn not_installed(hints: &ErrorHints) -> Self {
        Self::new(
            ErrorCode::NotInstalled,
            format!("{} CLI is not installed or could not be found", hints.display_name),
        )
        .with_suggestion(hints.install_hint.clone())
    }

    /// Text suitable for showing to a user.
    pub fn to_message(&self) -> String {
        let mut out = self.message.clone();
        if let Some(suggestion) = &self.suggestion {
            out.push_str(". ");
            out.push_str(suggestion);
        }
        if self.code == ErrorCode::Unknown {
            if let Some(details) = &self.details {
                out.push('\n');
                out.push_str(details.trim());
            }
        }
        out
    }
}

/// Per-backend remediation text.
#[derive(Debug, Clone)]
pub struct ErrorHints {
    pub display_name: String,
    pub install_hint: String,
    pub login_hint: String,
}

/// Raw failure observed at the process boundary, before classification.
#[derive(Debug)]
pub enum ProcessFailure {
    /// The executable could not be started.
    Spawn(std::io::Error),
    /// Reading the output stream failed.
    Io(std::io::Error),
    /// The process exited unsuccessfully.
    Exited { code: Option<i32>, stderr: String },
}

const AUTH_MARKERS: &[&str] = &[
    "not authenticated",
    "not logged in",
    "unauthorized",
    "401",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "please log in",
    "please login",
];
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "too many requests",
    "quota exceeded",
    "usage limit",
];
const MODEL_MARKERS: &[&str] = &[
    "invalid model",
    "model not found",
    "unknown model",
    "model_not_found",
    "unsupported model",
    "model is not available",
];
const NETWORK_MARKERS: &[&str] = &[
    "network",
    "connection",
    "econnrefused",
    "econnreset",
    "enotfound",
    "timeout",
    "timed out",
];
const NOT_FOUND_MARKERS: &[&str] = &["command not found", "no such file or directory", "enoent"];

/// Classify `(stderr, exit code)` into a structured error.
pub fn classify(stderr: &str, exit_code: Option<i32>, hints: &ErrorHints) -> ProviderError {
    let lower = stderr.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    let name = &hints.display_name;

    if exit_code == Some(127) || has(NOT_FOUND_MARKERS) {
        return ProviderError::not_installed(hints).with_details(stderr);
    }
    if has(RATE_LIMIT_MARKERS) {
        return ProviderError::new(ErrorCode::RateLimited, format!("{} is rate limited", name))
            .with_suggestion("Wait a few minutes and retry")
            .with_details(stderr);
    }
    if has(AUTH_MARKERS) {
        return ProviderError::new(
            ErrorCode::NotAuthenticated,
            format!("{} CLI is not authenticated", name),
        )
        .with_suggestion(hints.login_hint.clone())
        .with_details(stderr);
    }
    if has(MODEL_MARKERS) {
        return ProviderError::new(
            ErrorCode::ModelUnavailable,
            format!("The requested model is not available in {}", name),
        )
        .with_suggestion("Select a different model")
        .with_details(stderr);
    }
    if exit_code == Some(124) {
        return ProviderError::new(ErrorCode::Timeout, format!("{} timed out", name))
            .with_suggestion("Retry the request")
            .with_details(stderr);
    }
    if has(NETWORK_MARKERS) {
        return ProviderError::new(
            ErrorCode::NetworkError,
            format!("{} could not reach its service", name),
        )
        .with_suggestion("Check your connection and retry later")
        .with_details(stderr);
    }
    // Killed by a signal: no exit code on unix, 128+N from shells, 137/143 commonly.
    if matches!(exit_code, None | Some(137) | Some(143) | Some(139) | Some(134)) {
        return ProviderError::new(
            ErrorCode::ProcessCrashed,
            format!("{} process terminated unexpectedly", name),
        )
        .with_suggestion("Retry the request")
        .with_details(stderr);
    }

    let summary = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("exit code {}", exit_code.unwrap_or(-1)));
    ProviderError::new(
        ErrorCode::Unknown,
        format!("{} failed: {}", name, summary),
    )
    .with_details(stderr)
}

/// Classify a process-boundary failure.
pub fn classify_failure(failure: &ProcessFailure, hints: &ErrorHints) -> ProviderError {
    match failure {
        ProcessFailure::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ProviderError::not_installed(hints).with_details(e.to_string())
        }
        ProcessFailure::Spawn(e) => ProviderError::new(
            ErrorCode::ProcessCrashed,
            format!("Failed to start {} CLI: {}", hints.display_name, e),
        ),
        ProcessFailure::Io(e) => ProviderError::new(
            ErrorCode::ProcessCrashed,
            format!("Lost output from {} CLI: {}", hints.display_name, e),
        ),
        ProcessFailure::Exited { code, stderr } => classify(stderr, *code, hints),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints() -> ErrorHints {
        ErrorHints {
            display_name: "Test".to_string(),
            install_hint: "Install it".to_string(),
            login_hint: "Run `test login`".to_string(),
        }
    }

    #[test]
    fn test_rate_limit_is_recoverable() {
        let err = classify("Error: 429 Too Many Requests", Some(1), &hints());
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.recoverable);
    }

    #[test]
    fn test_auth_failure_suggests_login() {
        let err = classify("Error: Not authenticated. Please log in.", Some(1), &hints());
        assert_eq!(err.code, ErrorCode::NotAuthenticated);
        assert!(!err.recoverable);
        assert_eq!(err.suggestion.as_deref(), Some("Run `test login`"));
    }

    #[test]
    fn test_invalid_model() {
        let err = classify("invalid model: gpt-99", Some(2), &hints());
        assert_eq!(err.code, ErrorCode::ModelUnavailable);
        assert_eq!(err.suggestion.as_deref(), Some("Select a different model"));
    }

    #[test]
    fn test_network_errors() {
        assert_eq!(
            classify("connect ECONNREFUSED 127.0.0.1:443", Some(1), &hints()).code,
            ErrorCode::NetworkError
        );
        assert_eq!(
            classify("request timeout after 30s", Some(1), &hints()).code,
            ErrorCode::NetworkError
        );
    }

    #[test]
    fn test_signal_exit_is_crash() {
        let err = classify("", Some(137), &hints());
        assert_eq!(err.code, ErrorCode::ProcessCrashed);
        assert!(err.recoverable);
    }

    #[test]
    fn test_unmatched_is_unknown_with_raw_text() {
        let err = classify("something odd\nweird failure\n", Some(3), &hints());
        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(!err.recoverable);
        assert!(err.message.contains("weird failure"));
        assert!(err.to_message().contains("something odd"));
    }

    #[test]
    fn test_spawn_not_found_is_not_installed() {
        let failure = ProcessFailure::Spawn(std::io::Error::from(std::io::ErrorKind::NotFound));
        let err = classify_failure(&failure, &hints());
        assert_eq!(err.code, ErrorCode::NotInstalled);
        assert_eq!(err.suggestion.as_deref(), Some("Install it"));
    }

    #[test]
    fn test_error_code_serializes_screaming_case() {
        let value = serde_json::to_value(ErrorCode::ModelUnavailable).unwrap();
        assert_eq!(value, "MODEL_UNAVAILABLE");
    }
}
