//! Long-lived JSON-RPC client for the Kodi TCP interface.
//!
//! This module provides `KodiClient`, which keeps one connection to a Kodi
//! instance alive across network failures, demultiplexes the incoming byte
//! stream into responses and notifications, and offers a blocking `call()`
//! that waits for the response carrying the id it assigned.
//!
//! # Threads
//!
//! - Any number of caller threads use `call()` / `call_method()` / `send()`.
//!   Calls are serialized end-to-end, one request/response cycle at a time.
//! - One listener thread, started by `start()`, owns the receive buffer,
//!   performs every read, reconnects after failures and runs the callbacks.
//!
//! # Connection Lifecycle
//!
//! ```text
//!            start()                       read error / peer close
//!   Stopped ────────► Connected ◄───────────────────────────────┐
//!                        │ │                                     │
//!                        │ └─(error)─► Disconnected ──reconnect──┘
//!                        │               (backoff, then poll)
//!                        └─ stop() ──► Stopped
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::config::{clamp_port, ClientConfig};
use crate::packet::KodiPacket;

use super::error::RpcError;
use super::framing::{encode, ReceiveBuffer};
use super::pending::PendingTable;
use super::transport::{Endpoint, TcpTransport, Transport, TransportError};

/// Callback invoked with `true` when a connection is established and
/// `false` when a reconnect cycle begins.
pub type ConnectedCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback invoked for every message that is not a response to a call.
pub type PacketCallback = Arc<dyn Fn(KodiPacket) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// `true` once `stop()` has dropped the shutdown sender.
fn stop_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Sleep for `delay` unless shutdown is requested first. Returns `true` on
/// shutdown.
fn pause(shutdown: &Receiver<()>, delay: Duration) -> bool {
    !matches!(shutdown.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
}

/// Run a host callback, containing any panic so the listener survives it.
fn run_callback<F: FnOnce()>(name: &str, callback: F) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("Kodi {} callback panicked", name);
    }
}

/// Extract `result` from a response, turning a JSON-RPC `error` into
/// [`RpcError::Server`].
pub fn result_of(response: Value) -> Result<Value, RpcError> {
    let Value::Object(mut fields) = response else {
        return Err(RpcError::MissingResult);
    };

    if let Some(err) = fields.remove("error") {
        return Err(RpcError::Server {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
            data: err.get("data").cloned(),
        });
    }

    fields.remove("result").ok_or(RpcError::MissingResult)
}

/// State shared between the client handle and the listener thread.
struct Shared<T: Transport> {
    transport: T,
    config: ClientConfig,
    endpoint: RwLock<Endpoint>,
    pending: PendingTable,
    connected: AtomicBool,
    on_connected: RwLock<Option<ConnectedCallback>>,
    on_packet: RwLock<Option<PacketCallback>>,
}

impl<T: Transport> Shared<T> {
    fn endpoint(&self) -> Endpoint {
        read(&self.endpoint).clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn notify_connected(&self, connected: bool) {
        let callback = read(&self.on_connected).clone();
        if let Some(callback) = callback {
            run_callback("connected", || callback(connected));
        }
    }

    /// Single open attempt. Failures are logged and left to the listener's
    /// retry cycle.
    fn connect(&self) -> bool {
        let endpoint = self.endpoint();
        debug!("Connecting to Kodi at {}...", endpoint);

        match self.transport.open(&endpoint) {
            Ok(()) => {
                info!("Connected to Kodi at {}.", endpoint);
                self.connected.store(true, Ordering::SeqCst);
                self.notify_connected(true);
                true
            }
            Err(e) => {
                info!("Could not connect to Kodi at {}: {}", endpoint, e);
                false
            }
        }
    }

    fn reconnect(&self) {
        self.transport.shutdown();
        self.notify_connected(false);
        self.connect();
    }

    /// Listener thread body.
    fn listen(&self, shutdown: &Receiver<()>) {
        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];
        let mut buffer = ReceiveBuffer::new(self.config.max_buffer_size);

        loop {
            if stop_requested(shutdown) {
                break;
            }

            if !self.is_connected() {
                buffer.clear();
                if pause(shutdown, self.config.reconnect_interval()) {
                    break;
                }
                debug!("Connection to Kodi closed. Trying to reconnect...");
                self.reconnect();
                continue;
            }

            match self.receive(&mut chunk, &mut buffer) {
                Ok(()) => {}
                Err(TransportError::Timeout) => {
                    // A timeout invalidates any partially received message.
                    buffer.clear();
                    continue;
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    match e {
                        TransportError::Closed | TransportError::NotConnected => {
                            info!("Connection to Kodi lost: {}", e)
                        }
                        _ => error!("Error reading from Kodi: {}", e),
                    }
                    if pause(shutdown, self.config.reconnect_backoff()) {
                        break;
                    }
                    continue;
                }
            }

            if buffer.is_empty() {
                continue;
            }

            trace!(
                "Packet received from Kodi. Raw data: {}",
                String::from_utf8_lossy(buffer.as_bytes())
            );

            if let Err(e) = buffer.drain(|message| self.dispatch(message)) {
                warn!("Discarding data from Kodi: {}", e);
            }
        }

        debug!("Kodi listener stopped");
    }

    /// Read one burst of data into `buffer`.
    ///
    /// A read that fills the whole chunk is repeated immediately since more
    /// data is likely queued. Only the first read of a burst reports a
    /// timeout; a timeout after a full chunk just ends the burst.
    fn receive(&self, chunk: &mut [u8], buffer: &mut ReceiveBuffer) -> Result<(), TransportError> {
        let mut received = self.transport.read(chunk)?;

        loop {
            if let Err(e) = buffer.extend(&chunk[..received]) {
                error!("Could not read from Kodi: {}", e);
                return Ok(());
            }
            if received < chunk.len() {
                return Ok(());
            }

            received = match self.transport.read(chunk) {
                Ok(n) => n,
                Err(TransportError::Timeout) => return Ok(()),
                Err(e) => return Err(e),
            };
        }
    }

    /// Route one decoded message to its waiting caller or to the packet
    /// callback.
    fn dispatch(&self, message: Value) {
        if !message.is_object() {
            warn!("Ignoring non-object message from Kodi: {}", message);
            return;
        }

        let id = message
            .get("id")
            .map(|id| id.as_u64().and_then(|id| u32::try_from(id).ok()));

        match id {
            Some(Some(id)) => {
                if !self.pending.complete(id, message) {
                    debug!("Dropping response {} with no pending request", id);
                }
            }
            Some(None) => {
                debug!("Dropping response with unrecognized id: {}", message["id"]);
            }
            None => {
                let callback = read(&self.on_packet).clone();
                if let Some(callback) = callback {
                    let packet = KodiPacket::from_json(&message, Utc::now());
                    run_callback("packet received", || callback(packet));
                }
            }
        }
    }
}

/// Running listener thread plus the means to stop it.
struct Listener {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Client for the Kodi JSON-RPC TCP interface.
///
/// Callbacks run on the listener thread, inline with framing and
/// reconnection. They must return quickly and must not call back into
/// `call()`, which would wait on the thread that is running them. Forward
/// to a channel when real work is needed.
///
/// # Example
///
/// ```no_run
/// use kodi_link::{ClientConfig, KodiClient};
/// use serde_json::json;
///
/// let client = KodiClient::new(ClientConfig::new("192.168.1.20", 9090));
/// client.set_packet_received_callback(|packet| println!("{}", packet.method()));
/// client.start()?;
///
/// let players = client.call_method("Player.GetActivePlayers", Some(json!({})))?;
/// println!("{}", players);
/// # Ok::<(), kodi_link::RpcError>(())
/// ```
pub struct KodiClient<T: Transport = TcpTransport> {
    shared: Arc<Shared<T>>,
    listener: Mutex<Option<Listener>>,
    /// Serializes whole calls.
    call_lock: Mutex<()>,
    request_id: AtomicU32,
}

impl KodiClient<TcpTransport> {
    /// Create a TCP client. Nothing connects until [`start`](Self::start).
    pub fn new(config: ClientConfig) -> Self {
        let transport = TcpTransport::new(
            config.connect_timeout(),
            config.read_timeout(),
            config.write_timeout(),
        );
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> KodiClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let endpoint = Endpoint {
            hostname: config.hostname.clone(),
            port: config.port(),
        };

        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                endpoint: RwLock::new(endpoint),
                pending: PendingTable::new(),
                connected: AtomicBool::new(false),
                on_connected: RwLock::new(None),
                on_packet: RwLock::new(None),
            }),
            listener: Mutex::new(None),
            call_lock: Mutex::new(()),
            request_id: AtomicU32::new(0),
        }
    }

    /// Register the handler told about connection changes. Replaces any
    /// previous handler.
    pub fn set_connected_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *write(&self.shared.on_connected) = Some(Arc::new(callback));
    }

    /// Register the handler for notifications. Replaces any previous handler.
    pub fn set_packet_received_callback<F>(&self, callback: F)
    where
        F: Fn(KodiPacket) + Send + Sync + 'static,
    {
        *write(&self.shared.on_packet) = Some(Arc::new(callback));
    }

    /// Host the client connects to.
    pub fn hostname(&self) -> String {
        read(&self.shared.endpoint).hostname.clone()
    }

    /// Takes effect on the next (re)connect.
    pub fn set_hostname(&self, hostname: impl Into<String>) {
        write(&self.shared.endpoint).hostname = hostname.into();
    }

    /// Port the client connects to, already clamped.
    pub fn port(&self) -> u16 {
        read(&self.shared.endpoint).port
    }

    /// Set the port, falling back to 9090 outside 1..=65535. Takes effect on
    /// the next (re)connect.
    pub fn set_port(&self, port: i64) {
        write(&self.shared.endpoint).port = clamp_port(port);
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Start (or restart) listening.
    ///
    /// Stops any previous session first. Does nothing when no hostname is
    /// configured. A failed initial connect is not an error: the listener
    /// keeps retrying in the background.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Spawn`] if the listener thread cannot be created.
    pub fn start(&self) -> Result<(), RpcError> {
        self.stop();

        if self.hostname().is_empty() {
            debug!("No Kodi hostname configured; not starting listener");
            return Ok(());
        }

        self.shared.connect();

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("kodi-listener".to_string())
            .spawn(move || {
                if panic::catch_unwind(AssertUnwindSafe(|| shared.listen(&shutdown_rx))).is_err() {
                    error!("Kodi listener stopped unexpectedly");
                    shared.connected.store(false, Ordering::SeqCst);
                }
            })
            .map_err(RpcError::Spawn)?;

        *lock(&self.listener) = Some(Listener {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop listening and close the connection.
    ///
    /// Waits for the listener thread, which notices the request within one
    /// read timeout. Safe to call repeatedly or before `start()`.
    pub fn stop(&self) {
        if let Some(listener) = lock(&self.listener).take() {
            drop(listener.shutdown_tx);
            if listener.handle.join().is_err() {
                error!("Kodi listener thread panicked");
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.transport.shutdown();
    }

    /// Send a request object and block until its response arrives.
    ///
    /// An `id` field is assigned and inserted into `request`. Returns the
    /// complete response message. At most one call is in flight at a time;
    /// concurrent callers queue behind each other.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NotConnected`] when stopped or reconnecting
    /// - [`RpcError::InvalidRequest`] when `request` is not an object
    /// - [`RpcError::Transport`] when the write fails
    /// - [`RpcError::Timeout`] when no response arrives within the call timeout
    pub fn call(&self, mut request: Value) -> Result<Value, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::NotConnected);
        }
        if !request.is_object() {
            warn!("Not sending request that is not a JSON object: {}", request);
            return Err(RpcError::InvalidRequest);
        }
        let Some(fields) = request.as_object_mut() else {
            return Err(RpcError::InvalidRequest);
        };

        let _exclusive = lock(&self.call_lock);

        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        fields.insert("id".to_string(), Value::from(id));

        let payload = match encode(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode request {}: {}", id, e);
                return Err(RpcError::Encode(e));
            }
        };
        if payload.is_empty() {
            warn!("Request {} serialized to an empty payload", id);
            return Err(RpcError::EmptyPayload);
        }

        // Register before writing so a fast response always finds its slot.
        let pending = self.shared.pending.register(id);

        debug!("Sending packet {}", String::from_utf8_lossy(&payload));
        if let Err(e) = self.shared.transport.write(&payload) {
            error!("Error sending packet to Kodi: {}", e);
            return Err(e.into());
        }

        let timeout = self.shared.config.call_timeout();
        pending.wait(timeout).ok_or_else(|| {
            error!(
                "No response received to packet: {}",
                String::from_utf8_lossy(&payload)
            );
            RpcError::Timeout(timeout)
        })
    }

    /// Call `method` and return its `result`.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus [`RpcError::Server`] for
    /// a JSON-RPC error response.
    pub fn call_method(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let response = self.call(KodiPacket::new(method, params).to_json())?;
        result_of(response)
    }

    /// Fire-and-forget: send `packet` as a call and discard the response.
    pub fn send(&self, packet: &KodiPacket) {
        match self.call(packet.to_json()) {
            Ok(response) => debug!("Response to {}: {}", packet.method(), response),
            Err(RpcError::NotConnected) => {
                info!("Not sending {}: not connected to Kodi", packet.method())
            }
            Err(e) => debug!("Sending {} failed: {}", packet.method(), e),
        }
    }
}

impl<T: Transport> Drop for KodiClient<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
