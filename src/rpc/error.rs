use std::time::Duration;

use thiserror::Error;

use super::transport::TransportError;

/// Why a call produced no usable response.
///
/// Every variant is recoverable: the connection (if any) stays up and the
/// next call may succeed.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The client is stopped or currently reconnecting.
    #[error("Not connected to Kodi")]
    NotConnected,

    /// Requests must be JSON objects so an id can be attached.
    #[error("Request must be a JSON object")]
    InvalidRequest,

    /// The request could not be serialized.
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// Serialization produced no bytes.
    #[error("Request serialized to an empty payload")]
    EmptyPayload,

    /// Writing the request to the socket failed.
    #[error("Error sending packet to Kodi: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived in time.
    #[error("No response received within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Kodi answered with a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    Server {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// The response had neither `result` nor `error`.
    #[error("Response missing both result and error")]
    MissingResult,

    /// The listener thread could not be started.
    #[error("Failed to spawn listener thread: {0}")]
    Spawn(#[source] std::io::Error),
}
