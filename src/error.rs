//! Error types for relaypool subsystems.
//!
//! Defines error types for the major subsystems:
//! - Worker provisioning and lifecycle observation
//! - Transport channel delivery
//! - Envelope wire encoding
//! - Dispatch queue shutdown
//! - Session configuration

use thiserror::Error;

/// Errors that can occur while provisioning or observing workers.
///
/// These are absorbed by the worker supervisor's acquire/retry loop and
/// never surface to the caller who submitted a request.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provider daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to acquire worker: {0}")]
    AcquireFailed(String),

    #[error("Worker '{id}' not found")]
    WorkerNotFound { id: String },

    #[error("Failed to read worker status: {0}")]
    StatusUnavailable(String),

    #[error("Failed to release worker: {0}")]
    ReleaseFailed(String),

    #[error("Network setup failed: {0}")]
    NetworkFailed(String),

    #[error("File transfer to/from worker failed: {0}")]
    TransferFailed(String),

    #[error("Command execution on worker failed: {0}")]
    ExecFailed(String),

    #[error("Operation not supported by this provider: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum WireError {
    /// The wire format carries bodies as UTF-8 text; binary bodies are a
    /// documented limitation.
    #[error("Request/response body is not valid UTF-8 and cannot be carried by the wire format")]
    NonUtf8Body,

    #[error("URL '{0}' is missing a scheme")]
    MissingScheme(String),

    #[error("Malformed status line: {0}")]
    MalformedStatusLine(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while delivering one request to one worker.
///
/// A channel error marks the worker as failed; the in-flight request is
/// requeued and retried on another worker, so these never surface to the
/// original caller either.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to worker: {0}")]
    Connect(String),

    #[error("Connection handshake failed {attempts} times in a row: {last}")]
    HandshakeExhausted { attempts: u32, last: String },

    #[error("Invalid transport frame: {0}")]
    Frame(String),

    #[error("Remote command exited with code {exit_code}: {stderr}")]
    RemoteCommand { exit_code: i64, stderr: String },

    #[error("Wire encoding error: {0}")]
    Wire(#[from] WireError),

    #[error("Provider operation failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur on the dispatch queue.
///
/// The only queue failure mode exposed to callers is use after shutdown.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Dispatch queue is closed")]
    Closed,
}

/// Errors that can occur while configuring or operating a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A pool is already mounted at '{0}'")]
    DuplicateMount(String),

    #[error("No pool is mounted at '{0}'")]
    UnknownMount(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_error_display() {
        let err = ProvisionError::AcquireFailed("no capacity".to_string());
        assert!(err.to_string().contains("no capacity"));

        let err = ProvisionError::WorkerNotFound {
            id: "w-17".to_string(),
        };
        assert!(err.to_string().contains("w-17"));
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::HandshakeExhausted {
            attempts: 3,
            last: "connection refused".to_string(),
        };
        assert!(err.to_string().contains('3'));
        assert!(err.to_string().contains("connection refused"));

        let err = ChannelError::RemoteCommand {
            exit_code: 127,
            stderr: "not found".to_string(),
        };
        assert!(err.to_string().contains("127"));
    }

    #[test]
    fn test_wire_error_converts_into_channel_error() {
        let err: ChannelError = WireError::NonUtf8Body.into();
        assert!(matches!(err, ChannelError::Wire(WireError::NonUtf8Body)));
    }

    #[test]
    fn test_queue_error_equality() {
        assert_eq!(QueueError::Closed, QueueError::Closed);
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::DuplicateMount("http://calc".to_string());
        assert!(err.to_string().contains("http://calc"));
    }
}
