//! Error types for the tool-broker daemon.

use thiserror::Error;

/// Main error type for broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Bad CLI args or command string — fatal before startup.
    #[error("config error: {0}")]
    Config(String),

    /// OS failed to create the subprocess for a named child.
    #[error("failed to spawn child '{0}': {1}")]
    Spawn(String, String),

    /// `initialize` failed or timed out for a named child.
    #[error("handshake failed for child '{0}': {1}")]
    Handshake(String, String),

    /// A call's deadline elapsed before a response arrived.
    #[error("call to '{0}' timed out")]
    Timeout(String),

    /// The child process died while a call was pending, or is not running.
    #[error("child '{0}' terminated")]
    ChildTerminated(String),

    /// Unknown server, tool, resource, or prompt.
    #[error("not found: {0}")]
    NotFound(String),

    /// Payload not parseable or a required field is missing.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The child returned an explicit JSON-RPC error; forwarded verbatim.
    #[error("child '{0}' returned error {1}: {2}")]
    ChildError(String, i64, String),

    /// I/O failure on the client side of a transport.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// JSON-RPC error codes used when surfacing a `BrokerError` over TCP (§7).
impl BrokerError {
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            BrokerError::Config(_) => -32600,
            BrokerError::Spawn(..) => -32000,
            BrokerError::Handshake(..) => -32000,
            BrokerError::Timeout(_) => -32001,
            BrokerError::ChildTerminated(_) => -32002,
            BrokerError::NotFound(_) => -32601,
            BrokerError::InvalidArguments(_) => -32602,
            BrokerError::ChildError(_, code, _) => *code,
            BrokerError::Transport(_) => -32603,
        }
    }

    /// HTTP status code used when surfacing a `BrokerError` over HTTP/SSE (§7).
    pub fn http_status(&self) -> u16 {
        match self {
            BrokerError::Config(_) => 400,
            BrokerError::Spawn(..) => 502,
            BrokerError::Handshake(..) => 502,
            BrokerError::Timeout(_) => 504,
            BrokerError::ChildTerminated(_) => 502,
            BrokerError::NotFound(_) => 404,
            BrokerError::InvalidArguments(_) => 400,
            BrokerError::ChildError(..) => 400,
            BrokerError::Transport(_) => 502,
        }
    }
}
