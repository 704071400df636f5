use std::time::Duration;

use reposync_config::ValidationErrors;

/// Closed classification of everything that can go wrong while reconciling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Authentication,
    Permission,
    NotFound,
    Validation,
    RateLimit,
    Network,
    Conflict,
    RepositoryFailure,
    PartialFailure,
    CompleteFailure,
    ConfigFormat,
    Unknown,
}

impl ErrorKind {
    /// Retryable by construction; everything else needs operator action.
    pub fn default_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::Network)
    }

    /// Process exit code surfaced by the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Authentication | ErrorKind::Permission => 1,
            ErrorKind::PartialFailure => 3,
            ErrorKind::Validation => 4,
            ErrorKind::ConfigFormat => 5,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RepositoryFailure => "repository_failure",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::CompleteFailure => "complete_failure",
            ErrorKind::ConfigFormat => "config_format",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified error: kind, human message, optional resource label,
/// optional validation field/code, cause chain, retryability.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SyncError {
    kind: ErrorKind,
    message: String,
    resource: Option<String>,
    field: Option<String>,
    code: Option<String>,
    retryable: bool,
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            resource: None,
            field: None,
            code: None,
            retryable: kind.default_retryable(),
            retry_after: None,
            source: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, code: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self.code = Some(code.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// Time until the quota window resets, when the forge told us.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// The innermost classified kind in the cause chain. Wrapper kinds such
    /// as `RepositoryFailure` are transparent to guidance synthesis.
    pub fn root_kind(&self) -> ErrorKind {
        let mut kind = self.kind;
        let mut source = self.source.as_deref();
        while let Some(err) = source {
            match err.downcast_ref::<SyncError>() {
                Some(inner) => {
                    kind = inner.kind;
                    source = inner.source.as_deref();
                }
                None => break,
            }
        }
        kind
    }

    /// Classify an HTTP status with its response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => SyncError::new(
                ErrorKind::Authentication,
                "authentication failed: the token was rejected",
            ),
            403 if body.to_lowercase().contains("rate limit") => {
                SyncError::new(ErrorKind::RateLimit, "API rate limit exhausted")
            }
            403 => SyncError::new(
                ErrorKind::Permission,
                "the token lacks permission for this operation",
            ),
            404 => SyncError::new(ErrorKind::NotFound, "resource not found"),
            409 => SyncError::new(ErrorKind::Conflict, trimmed_message(body, "conflict")),
            422 => validation_from_body(body),
            500..=599 => SyncError::new(
                ErrorKind::Network,
                format!("server error (HTTP {status})"),
            ),
            other => {
                let mut err = SyncError::new(
                    ErrorKind::Unknown,
                    format!("unexpected HTTP status {other}: {}", trimmed_message(body, "")),
                );
                err.retryable = other >= 500;
                err
            }
        }
    }

    /// Classify a transport-level failure by its message.
    pub fn from_transport(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_network_message(&message) {
            SyncError::new(ErrorKind::Network, message)
        } else {
            SyncError::new(ErrorKind::Unknown, message)
        }
    }
}

const NETWORK_NEEDLES: &[&str] = &[
    "dial tcp",
    "connection refused",
    "connection reset",
    "connection timeout",
    "network is unreachable",
    "no such host",
    "i/o timeout",
    "timeout",
];

fn is_network_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_NEEDLES.iter().any(|needle| lower.contains(needle))
}

fn trimmed_message(body: &str, fallback: &str) -> String {
    let text = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// 422 bodies carry field-level details; extract the first one into the
/// classified error and keep the raw message.
fn validation_from_body(body: &str) -> SyncError {
    let mut err = SyncError::new(
        ErrorKind::Validation,
        trimmed_message(body, "the API rejected the request as invalid"),
    );
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(detail) = value["errors"].as_array().and_then(|a| a.first()) {
            let field = detail["field"].as_str().unwrap_or_default();
            let code = detail["code"].as_str().unwrap_or_default();
            if !field.is_empty() || !code.is_empty() {
                err = err.with_field(field, code);
            }
            if let Some(resource) = detail["resource"].as_str() {
                err = err.with_resource(resource);
            }
        }
    }
    err
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ErrorKind::Network
        } else if is_network_message(&err.to_string()) {
            ErrorKind::Network
        } else {
            ErrorKind::Unknown
        };
        SyncError::new(kind, err.to_string()).with_source(err)
    }
}

impl From<ValidationErrors> for SyncError {
    fn from(errors: ValidationErrors) -> Self {
        let mut err = SyncError::new(ErrorKind::Validation, errors.to_string());
        if let Some(first) = errors.errors().first() {
            err = err.with_field(first.field.clone(), first.code.clone());
        }
        err.with_source(errors)
    }
}

impl From<reposync_config::ConfigError> for SyncError {
    fn from(err: reposync_config::ConfigError) -> Self {
        SyncError::new(ErrorKind::ConfigFormat, err.to_string()).with_source(err)
    }
}

impl From<reposync_auth::AuthError> for SyncError {
    fn from(err: reposync_auth::AuthError) -> Self {
        SyncError::new(ErrorKind::Authentication, err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(SyncError::from_status(401, "").kind(), ErrorKind::Authentication);
        assert_eq!(SyncError::from_status(403, "forbidden").kind(), ErrorKind::Permission);
        assert_eq!(
            SyncError::from_status(403, "API rate limit exceeded").kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(SyncError::from_status(404, "").kind(), ErrorKind::NotFound);
        assert_eq!(SyncError::from_status(409, "").kind(), ErrorKind::Conflict);
        assert_eq!(SyncError::from_status(422, "{}").kind(), ErrorKind::Validation);
        assert_eq!(SyncError::from_status(502, "").kind(), ErrorKind::Network);
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(SyncError::from_status(500, "").retryable());
        assert!(SyncError::from_status(403, "rate limit").retryable());
        assert!(!SyncError::from_status(401, "").retryable());
        assert!(!SyncError::from_status(422, "{}").retryable());
        assert!(!SyncError::from_status(418, "").retryable());
    }

    #[test]
    fn validation_body_details_extracted() {
        let body = r#"{"message":"Validation Failed","errors":[{"resource":"Repository","field":"name","code":"custom"}]}"#;
        let err = SyncError::from_status(422, body);
        assert_eq!(err.field(), Some("name"));
        assert_eq!(err.code(), Some("custom"));
        assert_eq!(err.resource(), Some("Repository"));
        assert_eq!(err.message(), "Validation Failed");
    }

    #[test]
    fn transport_classification() {
        for msg in [
            "dial tcp 10.0.0.1:443: connect: connection refused",
            "connection reset by peer",
            "no such host",
            "i/o timeout",
            "request timeout exceeded",
        ] {
            assert_eq!(SyncError::from_transport(msg).kind(), ErrorKind::Network, "{msg}");
        }
        assert_eq!(
            SyncError::from_transport("certificate has expired").kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ErrorKind::Authentication.exit_code(), 1);
        assert_eq!(ErrorKind::Permission.exit_code(), 1);
        assert_eq!(ErrorKind::CompleteFailure.exit_code(), 2);
        assert_eq!(ErrorKind::PartialFailure.exit_code(), 3);
        assert_eq!(ErrorKind::Validation.exit_code(), 4);
        assert_eq!(ErrorKind::ConfigFormat.exit_code(), 5);
    }

    #[test]
    fn validation_errors_convert_with_first_field() {
        let mut errs = reposync_config::ValidationErrors::new();
        errs.push("webhooks[0].url", "invalid_scheme", "bad scheme");
        errs.push("topics[1]", "invalid_chars", "bad topic");
        let err: SyncError = errs.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field(), Some("webhooks[0].url"));
        assert!(!err.retryable());
    }
}
