//! Error types for the Conduit client.
//!
//! # Design
//! `Remote` gets a dedicated variant because callers routinely treat "the
//! server answered with an application error" differently from "the server
//! could not be reached." Transport failures keep the underlying cause as
//! their `source()` so it is never lost. A lookup that matches nothing is not
//! an error at all: bindings return `Option` for that.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConduitError>;

/// Errors returned by `ConduitConnection` and the typed bindings.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// The endpoint could not be reached, or the response could not be read.
    #[error("could not execute conduit call `{method}`: {source}")]
    Transport {
        method: String,
        #[source]
        source: TransportError,
    },

    /// The endpoint answered with a non-null `error_code` or `error_info`.
    #[error(
        "conduit method `{method}` failed with {}: {}",
        display_opt(.error_code),
        display_opt(.error_info)
    )]
    Remote {
        method: String,
        error_code: Option<String>,
        error_info: Option<String>,
    },

    /// A non-2xx status whose body was not an error envelope.
    #[error("HTTP {status} from `{method}`: {body}")]
    Http {
        method: String,
        status: u16,
        body: String,
    },

    /// The response did not have the shape the binding expected.
    #[error("could not decode `{method}` response as {expected}: {reason}")]
    Decode {
        method: String,
        expected: &'static str,
        reason: String,
    },

    /// A precondition failed before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The parameter tree could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ConduitError {
    pub(crate) fn decode(method: &str, expected: &'static str, reason: impl fmt::Display) -> Self {
        ConduitError::Decode {
            method: method.to_string(),
            expected,
            reason: reason.to_string(),
        }
    }

    /// True for errors raised before any request left the process.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ConduitError::InvalidArgument(_))
    }
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<none>")
}

/// What part of the HTTP exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connecting or sending the request failed.
    Send,
    /// The response body could not be read.
    Read,
    /// The call exceeded its timeout.
    Timeout,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Send => write!(f, "send failed"),
            TransportErrorKind::Read => write!(f, "could not read response"),
            TransportErrorKind::Timeout => write!(f, "timed out"),
        }
    }
}

/// A network or I/O failure from an `HttpExecutor`.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}
