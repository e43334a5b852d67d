//! Kodi Link Library
//!
//! A resilient client for the JSON-RPC interface Kodi exposes over TCP:
//!
//! - `rpc` - connection supervision, stream framing and request correlation
//! - `packet` - the `KodiPacket` view of notifications and outgoing calls
//! - `config` - connection settings loaded from file and environment
//!
//! # Example
//!
//! ```no_run
//! use kodi_link::{ClientConfig, KodiClient};
//!
//! let client = KodiClient::new(ClientConfig::load()?);
//! client.set_connected_callback(|up| println!("connected: {}", up));
//! client.set_packet_received_callback(|packet| println!("{}", packet.method()));
//! client.start()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod packet;
pub mod rpc;

pub use config::ClientConfig;
pub use packet::KodiPacket;
pub use rpc::{KodiClient, RpcError};
