//! Error types for the resilience layer.

use std::io;
use thiserror::Error;

/// Error returned by calls guarded by a circuit breaker.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit is open and no fallback was supplied. The operation was not invoked.
    #[error("circuit open: {circuit}")]
    CircuitOpen { circuit: String },

    /// The wrapped operation failed (after any retries).
    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// The operation's own error, if this is not a circuit rejection.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            ResilienceError::CircuitOpen { .. } => None,
        }
    }
}

/// Classification hooks used by the default retry predicate.
pub trait CallError: std::error::Error {
    /// HTTP status carried by the error, if any.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Whether the failure happened at the network/transport level.
    fn is_network(&self) -> bool {
        message_indicates_network(&self.to_string())
    }
}

/// True if an error message reads like a network or fetch failure.
pub fn message_indicates_network(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("network") || lower.contains("fetch")
}

impl CallError for io::Error {
    fn is_network(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
                | io::ErrorKind::AddrNotAvailable
        ) || message_indicates_network(&self.to_string())
    }
}

impl CallError for reqwest::Error {
    fn status(&self) -> Option<u16> {
        reqwest::Error::status(self).map(|s| s.as_u16())
    }

    fn is_network(&self) -> bool {
        self.is_connect() || self.is_timeout() || self.is_request()
    }
}
