//! Errors raised while talking to the remote tracking and profile services.

use thiserror::Error;

/// Coarse classification used by callers deciding how to report a failed
/// refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request did not complete: connection, timeout, non-2xx, or an
    /// error reported by the service itself.
    Fetch,
    /// The service answered but the payload could not be understood.
    Parse,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed reading response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tracker query {operation} reported: {message}")]
    Query { operation: String, message: String },
    #[error("malformed {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            _ => ErrorKind::Fetch,
        }
    }

    /// Whether a fresh connection attempt could succeed. Only connection-level
    /// transport failures qualify; the server's answers are never retried.
    pub fn is_reconnectable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => matches!(
                source.kind(),
                ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Io | ureq::ErrorKind::Dns
            ),
            _ => false,
        }
    }

    pub(crate) fn from_ureq(url: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => Self::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => Self::Transport {
                url: url.to_string(),
                source: Box::new(transport),
            },
        }
    }

    pub(crate) fn parse(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            what: what.into(),
            source,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
