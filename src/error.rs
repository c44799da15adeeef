use std::sync::Arc;

use crate::engine::ProtocolError;

/// Result type used throughout the SDK, with the error variant fixed to the
/// SDK-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Flipt client SDK.
///
/// The type is `Clone` because the last synchronization error is shared
/// between background tasks and returned to every caller while the `fail`
/// error strategy is in effect. Non-clonable sources are wrapped in `Arc`.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid client configuration, fatal at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network error while fetching flag state.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The server answered a snapshot fetch with an unexpected status code.
    #[error("unexpected status code: {status}")]
    Server {
        /// HTTP status code of the response.
        status: u16,
    },

    /// A transient fetch kept failing after exhausting the retry budget.
    #[error("failed after {attempts} retries, last error: {source}")]
    RetriesExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// A snapshot payload could not be parsed into a namespace document.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The engine reported a failed operation (evaluation or snapshot
    /// load), surfaced from its result envelope.
    #[error("{0}")]
    Engine(String),

    /// The call boundary between the client and the embedded engine
    /// misbehaved: a region could not be allocated, written, read or
    /// released, or an envelope failed to decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl Error {
    /// Whether a fetch failure is worth retrying with backoff.
    ///
    /// Rate limiting and gateway-level 5xx responses are expected to clear up
    /// on their own; so are timeouts and connection-level failures. Anything
    /// else (other 4xx, parse failures) is permanent for that attempt.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Error::Server { status } => matches!(*status, 429 | 502 | 503 | 504),
            Error::Network(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn transient_status_codes() {
        for status in [429u16, 502, 503, 504] {
            assert!(
                Error::Server { status }.is_transient(),
                "{status} should be transient"
            );
        }
        for status in [400u16, 401, 403, 404, 500] {
            assert!(
                !Error::Server { status }.is_transient(),
                "{status} should be permanent"
            );
        }
    }

    #[test]
    fn configuration_errors_are_permanent() {
        assert!(!Error::InvalidConfiguration("empty namespace".into()).is_transient());
        assert!(!Error::InvalidSnapshot("bad json".into()).is_transient());
    }
}
