//! Delimiter-free JSON message framing for the Kodi TCP interface.
//!
//! Kodi writes JSON-RPC objects back-to-back on the socket with no length
//! prefix and no separator, so message boundaries can only be found by
//! parsing. This module implements that incremental parse on top of
//! `serde_json`'s streaming deserializer.
//!
//! # Wire Format
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"result":[]}{"jsonrpc":"2.0","method":"Player.OnPlay","params":{..}}
//! ```
//!
//! A single TCP read may carry half a message, exactly one message, or
//! several messages followed by the start of another. [`ReceiveBuffer`]
//! accumulates bytes until at least one complete value can be decoded and
//! keeps the unconsumed tail for the next read.

use serde_json::Value;
use thiserror::Error;

/// Maximum number of unparsed bytes held before the buffer is discarded.
pub const MAX_BUFFER_SIZE: usize = 1_000_000;

/// Framing-level failures detected while accumulating or decoding bytes.
///
/// Both variants leave the connection usable; the buffered bytes have
/// already been discarded when the error is returned.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Accumulated bytes exceeded the cap without yielding a message.
    #[error("Too much data: {size} bytes buffered (max {max})")]
    Overflow {
        /// Size the buffer would have reached.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// Bytes that can never form a valid JSON value.
    #[error("Malformed JSON in receive buffer ({discarded} bytes discarded): {source}")]
    Malformed {
        /// Number of bytes thrown away.
        discarded: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of a single decode attempt.
#[derive(Debug)]
pub enum Decoded {
    /// One complete value; `consumed` is the absolute offset just past it.
    Message { value: Value, consumed: usize },
    /// The buffer ends before the value does (or holds only whitespace).
    Incomplete,
    /// The bytes at the offset are not valid JSON.
    Malformed(serde_json::Error),
}

/// Decode one JSON value from `buffer` starting at `offset`.
///
/// Distinguishes "wait for more bytes" from "this will never parse" using
/// the EOF classification of the `serde_json` error.
///
/// # Example
///
/// ```
/// use kodi_link::rpc::{decode, Decoded};
///
/// let bytes = br#"{"id":1}{"id":2}"#;
/// match decode(bytes, 0) {
///     Decoded::Message { consumed, .. } => assert_eq!(consumed, 8),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub fn decode(buffer: &[u8], offset: usize) -> Decoded {
    let Some(remaining) = buffer.get(offset..) else {
        return Decoded::Incomplete;
    };

    let mut stream = serde_json::Deserializer::from_slice(remaining).into_iter::<Value>();
    match stream.next() {
        None => Decoded::Incomplete,
        Some(Ok(value)) => Decoded::Message {
            value,
            consumed: offset + stream.byte_offset(),
        },
        Some(Err(e)) if e.is_eof() => Decoded::Incomplete,
        Some(Err(e)) => Decoded::Malformed(e),
    }
}

/// Serialize a JSON value for the wire.
///
/// # Errors
///
/// Returns the `serde_json` error if the value cannot be serialized.
pub fn encode(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Accumulates raw socket bytes and splits them into JSON messages.
///
/// Owned exclusively by the read loop.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    max_size: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(MAX_BUFFER_SIZE)
    }
}

impl ReceiveBuffer {
    /// Create an empty buffer capped at `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(4096),
            max_size,
        }
    }

    /// Append freshly read bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Overflow`] when the cap would be exceeded. The
    /// buffer is cleared in that case rather than grown.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), FramingError> {
        let size = self.data.len() + bytes.len();
        if size > self.max_size {
            self.data.clear();
            return Err(FramingError::Overflow {
                size,
                max: self.max_size,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Decode every complete message currently buffered.
    ///
    /// Each message is handed to `on_message` in arrival order. An incomplete
    /// trailing message stays buffered so the next read can finish it.
    /// Returns the number of messages delivered.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Malformed`] after discarding the whole buffer
    /// when invalid JSON is found. Messages decoded before the bad bytes have
    /// already been delivered.
    pub fn drain<F>(&mut self, mut on_message: F) -> Result<usize, FramingError>
    where
        F: FnMut(Value),
    {
        let mut offset = 0;
        let mut delivered = 0;

        while offset < self.data.len() {
            match decode(&self.data, offset) {
                Decoded::Message { value, consumed } => {
                    offset = consumed;
                    delivered += 1;
                    on_message(value);
                }
                Decoded::Incomplete => break,
                Decoded::Malformed(source) => {
                    let discarded = self.data.len();
                    self.data.clear();
                    return Err(FramingError::Malformed { discarded, source });
                }
            }
        }

        if self.data[offset..].iter().all(u8::is_ascii_whitespace) {
            self.data.clear();
        } else if offset > 0 {
            self.data.drain(..offset);
        }

        Ok(delivered)
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes currently buffered, for trace logging.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
