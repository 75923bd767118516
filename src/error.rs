//! Unified request error model and mapping helpers.
//! Resolution and write-pipeline faults are expressed as `AppError` and turned into
//! HTTP status codes (plus `Allow` / `Error` headers) at the resource layer.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    BadRequest { message: String },
    NotFound { message: String },
    MethodNotAllowed { allow: &'static str },
    UnsupportedMediaType { media_type: String },
    Codec { message: String },
    Persistence { message: String },
    Internal { message: String },
}

impl AppError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self { AppError::BadRequest { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }
    pub fn method_not_allowed(allow: &'static str) -> Self { AppError::MethodNotAllowed { allow } }
    pub fn unsupported<S: Into<String>>(media_type: S) -> Self { AppError::UnsupportedMediaType { media_type: media_type.into() } }
    pub fn codec<S: Into<String>>(msg: S) -> Self { AppError::Codec { message: msg.into() } }
    pub fn persistence<S: Into<String>>(msg: S) -> Self { AppError::Persistence { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal { message: msg.into() } }

    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::BadRequest { .. } => "bad_request",
            AppError::NotFound { .. } => "not_found",
            AppError::MethodNotAllowed { .. } => "method_not_allowed",
            AppError::UnsupportedMediaType { .. } => "unsupported_media_type",
            AppError::Codec { .. } => "codec_error",
            AppError::Persistence { .. } => "persistence_error",
            AppError::Internal { .. } => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AppError::BadRequest { message }
            | AppError::NotFound { message }
            | AppError::Codec { message }
            | AppError::Persistence { message }
            | AppError::Internal { message } => message.clone(),
            AppError::MethodNotAllowed { allow } => format!("allowed methods: {}", allow),
            AppError::UnsupportedMediaType { media_type } => format!("media type '{}' is not accepted here", media_type),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::BadRequest { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::MethodNotAllowed { .. } => 405,
            AppError::UnsupportedMediaType { .. } => 415,
            AppError::Codec { .. } => 500,
            AppError::Persistence { .. } => 500,
            AppError::Internal { .. } => 500,
        }
    }

    /// Fault text surfaced in the `Error` response header, only for server-side faults.
    pub fn fault_header(&self) -> Option<String> {
        match self {
            AppError::Codec { message }
            | AppError::Persistence { message }
            | AppError::Internal { message } => Some(message.clone()),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Persistence { message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Descriptor hooks report through anyhow; treat as a codec/transform fault
        AppError::Codec { message: format!("{:#}", err) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::bad_request("bad path").http_status(), 400);
        assert_eq!(AppError::not_found("missing").http_status(), 404);
        assert_eq!(AppError::method_not_allowed("GET").http_status(), 405);
        assert_eq!(AppError::unsupported("x/bogus").http_status(), 415);
        assert_eq!(AppError::codec("bad json").http_status(), 500);
        assert_eq!(AppError::persistence("disk full").http_status(), 500);
        assert_eq!(AppError::internal("panic").http_status(), 500);
    }

    #[test]
    fn fault_header_only_for_server_faults() {
        assert_eq!(AppError::persistence("disk full").fault_header().as_deref(), Some("disk full"));
        assert!(AppError::not_found("x").fault_header().is_none());
        assert!(AppError::unsupported("x/bogus").fault_header().is_none());
    }

    #[test]
    fn io_errors_become_persistence_faults() {
        let e: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(e.code_str(), "persistence_error");
        assert_eq!(e.to_string(), "persistence_error: denied");
    }
}
