//! Error types for MQTT transport operations.
//!
//! Lets the load driver tell a fatal operation failure apart from a
//! malformed inbound packet without depending on `rumqttc` error types.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the mqtt-transport crate.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client rejected the request (request channel closed or full).
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// An inbound packet could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The session's event loop has stopped; nothing more will arrive.
    #[error("session closed")]
    Closed,

    /// TLS files were given in a combination that cannot be used.
    #[error("invalid TLS configuration: {reason}")]
    TlsConfig { reason: &'static str },

    /// TLS material could not be loaded.
    #[error("failed to read TLS file `{path}`: {source}")]
    TlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Returns true if the session can keep receiving after this error.
    ///
    /// Only a decode failure is recoverable, everything else means the
    /// operation itself failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Decode(_))
    }
}

/// Shorthand result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::TransportError;

    #[test]
    fn only_decode_is_recoverable() {
        assert!(TransportError::Decode("bad remaining length".into()).is_recoverable());
        assert!(!TransportError::Closed.is_recoverable());
        assert!(
            !TransportError::TlsConfig {
                reason: "a client certificate needs a CA file"
            }
            .is_recoverable()
        );
    }
}
