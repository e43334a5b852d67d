//! Byte-stream transport underneath the JSON-RPC client.
//!
//! The client only needs four operations from the network: open a
//! connection, read whatever bytes are available (bounded by a read
//! timeout), write a whole payload, and shut down. [`Transport`] captures
//! exactly that, and [`TcpTransport`] implements it over a blocking
//! `std::net::TcpStream`.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default socket read timeout. Also bounds how long `stop()` can wait for
/// the read loop to notice a shutdown request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default socket write timeout. Bounds a write to a peer that stopped
/// reading.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport failure classes.
///
/// The read loop reacts differently to each: a timeout is routine, a
/// closed or failed connection triggers the reconnect cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No data arrived within the read timeout.
    #[error("Read timed out")]
    Timeout,

    /// The remote side closed the connection.
    #[error("Connection closed by peer")]
    Closed,

    /// Operation attempted before `open()` succeeded or after `shutdown()`.
    #[error("Transport is not open")]
    NotConnected,

    /// Could not establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] io::Error),

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::Closed,
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
                TransportError::ConnectionFailed(err)
            }
            _ => TransportError::Io(err),
        }
    }
}

/// Remote host and port of the Kodi JSON-RPC TCP interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Byte-stream provider used by the client.
///
/// Implementations are shared between the read loop (which calls `read`)
/// and calling threads (which call `write`), so all methods take `&self`.
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh connection, replacing any previous one.
    fn open(&self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Read available bytes into `buf`, blocking at most the read timeout.
    ///
    /// Never returns `Ok(0)`: an orderly close is `TransportError::Closed`.
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the whole payload.
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the connection. Safe to call when nothing is open.
    fn shutdown(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocking TCP transport.
///
/// Reads and writes go through two handles of the same socket, each behind
/// its own mutex, so a blocked read never holds up a write. A third handle
/// is only ever locked briefly and lets `shutdown()` close the socket while
/// a read or write is still blocked on it.
pub struct TcpTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<TcpStream>>,
    control: Mutex<Option<TcpStream>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
            DEFAULT_WRITE_TIMEOUT,
        )
    }
}

impl TcpTransport {
    /// A zero read or write timeout means "block indefinitely".
    pub fn new(connect_timeout: Duration, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            write_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: Mutex::new(None),
        }
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
        let addrs = (endpoint.hostname.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(TransportError::ConnectionFailed)?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::ConnectionFailed(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No addresses found for {}", endpoint.hostname),
            )
        })))
    }
}

impl Transport for TcpTransport {
    fn open(&self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.shutdown();

        let stream = self.connect(endpoint)?;
        stream.set_read_timeout(Some(self.read_timeout).filter(|t| !t.is_zero()))?;
        stream.set_write_timeout(Some(self.write_timeout).filter(|t| !t.is_zero()))?;
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        let control = stream.try_clone()?;

        *lock(&self.control) = Some(control);
        *lock(&self.writer) = Some(write_half);
        *lock(&self.reader) = Some(stream);
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut guard = lock(&self.reader);
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.read(buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = lock(&self.writer);
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = stream.write_all(data).and_then(|()| stream.flush()) {
            // Part of the payload may be on the wire; the stream cannot be
            // reused, so close it and let the read loop reconnect.
            let _ = stream.shutdown(Shutdown::Both);
            return Err(e.into());
        }
        Ok(())
    }

    fn shutdown(&self) {
        // Closing through the control handle unblocks a pending read or
        // write before their locks are taken.
        if let Some(stream) = lock(&self.control).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.writer).take();
        lock(&self.reader).take();
    }
}
