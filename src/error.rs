//! Error taxonomy shared by every pipeline stage.
//!
//! Each stage has its own typed error so stage implementations stay
//! independently testable; [`ErrorKind`] is the flattened taxonomy that
//! actually lands in `PipelineResult.errors` (spec §7).

use thiserror::Error;

/// The stable error-kind taxonomy from the specification. This is what
/// callers see in `PipelineResult.errors`; it is deliberately decoupled
/// from the richer per-stage error enums below so the public surface
/// never has to change when an internal stage gains detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    InvalidUrl,
    DownloadTimeout,
    HttpError,
    FileTooLarge,
    RequestError,
    InvalidFormat,
    CorruptedImage,
    UnsupportedFormat,
    DecompressionBomb,
    ResizeFailed,
    ConversionFailed,
    QualityTooLow,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "INVALID_URL",
            ErrorKind::DownloadTimeout => "DOWNLOAD_TIMEOUT",
            ErrorKind::HttpError => "HTTP_ERROR",
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::RequestError => "REQUEST_ERROR",
            ErrorKind::InvalidFormat => "INVALID_FORMAT",
            ErrorKind::CorruptedImage => "CORRUPTED_IMAGE",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::DecompressionBomb => "DECOMPRESSION_BOMB",
            ErrorKind::ResizeFailed => "RESIZE_FAILED",
            ErrorKind::ConversionFailed => "CONVERSION_FAILED",
            ErrorKind::QualityTooLow => "QUALITY_TOO_LOW",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-URL failure recorded in `PipelineResult.errors`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StageError {
    pub url: String,
    pub error_kind: ErrorKind,
    pub detail: String,
}

impl StageError {
    pub fn new(url: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            error_kind: kind,
            detail: detail.into(),
        }
    }
}

/// C1 validation failure.
#[derive(Debug, Error, Clone)]
pub enum ValidationError {
    #[error("url could not be parsed: {0}")]
    Unparsable(String),
    #[error("scheme {0} is not https")]
    NotHttps(String),
    #[error("host {0} is not on the allow-list")]
    HostNotAllowed(String),
    #[error("path matches denied extension {0}")]
    DeniedExtension(String),
}

impl From<&ValidationError> for ErrorKind {
    fn from(_: &ValidationError) -> Self {
        ErrorKind::InvalidUrl
    }
}

/// C2 download failure.
#[derive(Debug, Error, Clone)]
pub enum DownloadError {
    #[error("download timed out")]
    Timeout,
    #[error("http status {0}")]
    Http(u16),
    #[error("response exceeded size cap: {0} bytes")]
    TooLarge(usize),
    #[error("request error: {0}")]
    Request(String),
}

impl From<&DownloadError> for ErrorKind {
    fn from(e: &DownloadError) -> Self {
        match e {
            DownloadError::Timeout => ErrorKind::DownloadTimeout,
            DownloadError::Http(_) => ErrorKind::HttpError,
            DownloadError::TooLarge(_) => ErrorKind::FileTooLarge,
            DownloadError::Request(_) => ErrorKind::RequestError,
        }
    }
}

/// C3 decode failure.
#[derive(Debug, Error, Clone)]
pub enum DecodeError {
    #[error("bytes are not a recognizable image: {0}")]
    InvalidFormat(String),
    #[error("image header parsed but pixel decode failed: {0}")]
    Corrupted(String),
    #[error("recognized but unsupported format: {0}")]
    Unsupported(String),
    #[error("declared or realized pixel count {0} exceeds cap")]
    DecompressionBomb(u64),
}

impl From<&DecodeError> for ErrorKind {
    fn from(e: &DecodeError) -> Self {
        match e {
            DecodeError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            DecodeError::Corrupted(_) => ErrorKind::CorruptedImage,
            DecodeError::Unsupported(_) => ErrorKind::UnsupportedFormat,
            DecodeError::DecompressionBomb(_) => ErrorKind::DecompressionBomb,
        }
    }
}

/// C7 normalize/encode failure.
#[derive(Debug, Error, Clone)]
pub enum NormalizeError {
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("color conversion failed: {0}")]
    Conversion(String),
}

impl From<&NormalizeError> for ErrorKind {
    fn from(e: &NormalizeError) -> Self {
        match e {
            NormalizeError::Resize(_) => ErrorKind::ResizeFailed,
            NormalizeError::Conversion(_) => ErrorKind::ConversionFailed,
        }
    }
}

/// C8 cache failure. Never propagated to the coordinator's public API;
/// callers only ever see this logged, per spec §7's "cache failures are
/// non-fatal" rule.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("l2 backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Misconfiguration — the one class of error allowed to escape the
/// pipeline's public API, since it indicates a programmer error rather
/// than a per-URL failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
