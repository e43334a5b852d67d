//! JSON-RPC client for Kodi's TCP interface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐          TCP :9090           ┌─────────────────────┐
//! │   Host app      │  ◄──────────────────────────►│        Kodi         │
//! │  (KodiClient)   │   JSON-RPC 2.0, no framing   │   (JSON-RPC server) │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Kodi writes bare JSON objects back to back with no length prefix or
//! delimiter. Message boundaries are found by parsing:
//!
//! ```text
//! {"jsonrpc":"2.0","id":0,"result":[]}{"jsonrpc":"2.0","method":"Player.OnStop",...}
//! ```
//!
//! Messages with an `id` answer a call; everything else is a notification.
//!
//! # Usage
//!
//! ```no_run
//! use kodi_link::{ClientConfig, KodiClient};
//! use serde_json::json;
//!
//! let client = KodiClient::new(ClientConfig::new("kodi.local", 9090));
//! client.start()?;
//! let response = client.call(json!({"jsonrpc": "2.0", "method": "JSONRPC.Ping"}))?;
//! assert_eq!(response["result"], "pong");
//! # Ok::<(), kodi_link::RpcError>(())
//! ```

mod client;
mod error;
pub mod framing;
mod pending;
mod transport;

pub use client::{result_of, ConnectedCallback, KodiClient, PacketCallback};
pub use error::RpcError;
pub use framing::{decode, encode, Decoded, FramingError, ReceiveBuffer, MAX_BUFFER_SIZE};
pub use pending::{PendingGuard, PendingTable};
pub use transport::{
    Endpoint, TcpTransport, Transport, TransportError, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
