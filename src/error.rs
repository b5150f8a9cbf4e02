//! Error types for riptide.

use thiserror::Error;

/// Redis client error types.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Connecting the underlying socket failed. The message is surfaced
    /// verbatim from the connect stage.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// IO error while driving the socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server replied with an error.
    #[error("Redis error: {0}")]
    Redis(String),

    /// The connection dropped while commands were still in flight.
    #[error("Connection lost")]
    ConnectionLost,

    /// The client was closed; issued after `close()` and for any command
    /// still pending when `close()` ran.
    #[error("Client closed")]
    Closed,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Decoder needs more bytes to finish the current value.
    #[error("Incomplete data")]
    Incomplete,
}

/// Result type for Redis operations.
pub type RedisResult<T> = Result<T, RedisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RedisError::Connection("refused".into());
        assert_eq!(err.to_string(), "Connection failed: refused");
        assert_eq!(RedisError::Closed.to_string(), "Client closed");
    }
}
