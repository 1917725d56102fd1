use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use thiserror::Error;

/// Owned error for failures produced outside this crate (transports, bodies).
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Cloneable handle to a body-read failure, so one failed read can be
/// reported from every place that needed the body.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Rough classification of a transport failure, for logs and retry triage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable machine-readable code for every [`Error`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Configuration,
    InvalidUrl,
    SerializeJson,
    SerializeForm,
    RequestBuild,
    Transport,
    HttpStatus,
    ReadBody,
    Decode,
    Validation,
    Hybrid,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::InvalidUrl => "invalid_url",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::HttpStatus => "http_status",
            Self::ReadBody => "read_body",
            Self::Decode => "decode",
            Self::Validation => "validation",
            Self::Hybrid => "hybrid",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid agent configuration: {message}")]
    Configuration { message: String },
    #[error("invalid request url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to serialize json request body: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize form request body: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {url}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: SharedError,
    },
    #[error("failed to decode response json: {source}, body: {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("response validation failed: {message}")]
    Validation { message: String },
    #[error("hybrid response handling failed at arm {index}: {source}")]
    Hybrid {
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("request canceled")]
    Cancelled,
}

impl Error {
    /// Shorthand for configuration errors raised by options and handlers.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for semantic rejections raised by [`crate::Wrapper`]
    /// implementations.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { .. } => ErrorCode::Configuration,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Status(_) => ErrorCode::HttpStatus,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Hybrid { .. } => ErrorCode::Hybrid,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Whether a retry policy may re-run the attempt after this failure.
    ///
    /// Transport, status, body-read, decode and validation failures are
    /// transient; configuration, construction and encoding failures are
    /// programming errors and never retried. Hybrid failures take the class
    /// of the arm that failed. Cancellation is always terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Status(_)
            | Self::ReadBody { .. }
            | Self::Decode { .. }
            | Self::Validation { .. } => true,
            Self::Hybrid { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Whether this failure came from a wrapper's `validate()`, possibly
    /// through a hybrid arm.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::Hybrid { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

/// The response arrived with a status code outside the expected set.
///
/// Carries the actual code, the expected set, and the best-effort body
/// bytes; when reading the body itself failed, that failure is folded in
/// instead. Immutable once constructed.
#[derive(Debug)]
pub struct StatusError {
    status: StatusCode,
    expected: Vec<StatusCode>,
    body: Option<Bytes>,
    read_error: Option<SharedError>,
}

impl StatusError {
    pub(crate) fn new(
        expected: &[StatusCode],
        status: StatusCode,
        body: Result<Bytes, SharedError>,
    ) -> Self {
        let (body, read_error) = match body {
            Ok(bytes) => (Some(bytes), None),
            Err(source) => (None, Some(source)),
        };
        Self {
            status,
            expected: expected.to_vec(),
            body,
            read_error,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn expected(&self) -> &[StatusCode] {
        &self.expected
    }

    /// Response body bytes, when reading them succeeded.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn read_error(&self) -> Option<&(dyn StdError + 'static)> {
        self.read_error
            .as_deref()
            .map(|error| error as &(dyn StdError + 'static))
    }

    fn expected_u16(&self) -> Vec<u16> {
        self.expected.iter().map(|code| code.as_u16()).collect()
    }
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(read_error) = &self.read_error {
            return write!(
                formatter,
                "http status {} is not expected ({:?}) and read body failed: {}",
                self.status.as_u16(),
                self.expected_u16(),
                read_error
            );
        }

        write!(
            formatter,
            "http status {} is not expected ({:?}), body: {}",
            self.status.as_u16(),
            self.expected_u16(),
            String::from_utf8_lossy(self.body.as_deref().unwrap_or_default())
        )
    }
}

impl StdError for StatusError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.read_error()
    }
}
