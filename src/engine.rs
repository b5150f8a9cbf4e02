//! Protocol engine: the non-blocking Redis wire driver.
//!
//! The poll thread is the sole caller of everything here. [`ProtocolEngine`]
//! is the seam between the dispatch machinery and the wire: the production
//! implementation is [`RespEngine`] over a non-blocking TCP socket, and the
//! test suite substitutes scripted engines through the same trait.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::decoder;
use crate::encoder;
use crate::error::{RedisError, RedisResult};
use crate::event_loop::ReplyPort;
use crate::reply::Reply;

const READ_CHUNK: usize = 16 * 1024;

/// Per-command record attached to a submission so the completion can find
/// its destination.
///
/// Ephemeral infos are consumed by their single completion. A persistent
/// info (pub/sub) is kept by the engine and receives every matching message
/// until the engine is dropped.
#[derive(Debug, Clone)]
pub struct CallbackInfo {
    pub(crate) port: ReplyPort,
    pub(crate) command_id: i64,
    pub(crate) persistent: bool,
}

impl CallbackInfo {
    pub(crate) fn new(port: ReplyPort, command_id: i64) -> Self {
        Self {
            port,
            command_id,
            persistent: false,
        }
    }

    pub(crate) fn persistent(port: ReplyPort, command_id: i64) -> Self {
        Self {
            port,
            command_id,
            persistent: true,
        }
    }
}

/// A completed command: the callback info it was submitted with and the
/// decoded reply. `None` stands for the engine's null-reply case and is
/// posted as [`Reply::Nil`].
#[derive(Debug)]
pub struct Completion {
    pub info: CallbackInfo,
    pub reply: Option<Reply>,
}

/// Non-blocking Redis protocol engine.
///
/// The contract mirrors the poll loop's needs: `submit` formats a command
/// into the output buffer and registers its callback, `on_write`/`on_read`
/// advance the socket when `poll(2)` reports readiness, and `on_read`
/// appends one [`Completion`] per finished reply, in command order.
pub trait ProtocolEngine: Send {
    /// Format `args` into the output buffer and register `info` for the
    /// resulting reply. Does not perform I/O.
    fn submit(&mut self, args: &[Vec<u8>], info: CallbackInfo) -> RedisResult<()>;

    /// Flush pending output bytes to the socket. Never blocks.
    fn on_write(&mut self) -> RedisResult<()>;

    /// Read available bytes and append a [`Completion`] per decoded reply.
    /// Never blocks.
    fn on_read(&mut self, out: &mut Vec<Completion>) -> RedisResult<()>;

    /// The socket fd to multiplex on.
    fn fd(&self) -> RawFd;

    fn is_connected(&self) -> bool;

    /// Whether output is pending, i.e. the poll should watch writability.
    fn wants_write(&self) -> bool;

    /// Initiate shutdown; after this `is_connected` reports false.
    fn disconnect(&mut self);
}

/// Production engine: RESP over a non-blocking TCP stream.
pub struct RespEngine {
    stream: TcpStream,
    inbuf: BytesMut,
    outbuf: BytesMut,
    /// Ephemeral callbacks, FIFO — replies arrive in submission order.
    pending: VecDeque<CallbackInfo>,
    /// Persistent pub/sub callback; set once the connection subscribes.
    subscriber: Option<CallbackInfo>,
    connected: bool,
}

impl RespEngine {
    /// Connect to a Redis server and switch the socket to non-blocking
    /// mode. Name resolution and the TCP handshake block, so callers on a
    /// runtime wrap this in `spawn_blocking`.
    pub fn connect(host: &str, port: u16) -> RedisResult<Self> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| RedisError::Connection(format!("{}:{}: {}", host, port, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected, non-blocking stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            outbuf: BytesMut::with_capacity(4096),
            pending: VecDeque::new(),
            subscriber: None,
            connected: true,
        }
    }

    fn route(&mut self, reply: Reply, out: &mut Vec<Completion>) -> RedisResult<()> {
        if let Some(sub) = &self.subscriber {
            if is_pubsub_reply(&reply) {
                out.push(Completion {
                    info: sub.clone(),
                    reply: Some(reply),
                });
                return Ok(());
            }
        }
        if let Some(info) = self.pending.pop_front() {
            out.push(Completion {
                info,
                reply: Some(reply),
            });
            return Ok(());
        }
        if matches!(reply, Reply::Push(_)) {
            // Out-of-band push with nobody subscribed; nothing to forward to.
            warn!("dropping unsolicited push reply");
            return Ok(());
        }
        Err(RedisError::Protocol("Reply with no pending command".into()))
    }
}

impl ProtocolEngine for RespEngine {
    fn submit(&mut self, args: &[Vec<u8>], info: CallbackInfo) -> RedisResult<()> {
        debug_assert!(!args.is_empty());
        encoder::encode_command_into(&mut self.outbuf, args);
        if info.persistent {
            self.subscriber = Some(info);
        } else {
            self.pending.push_back(info);
        }
        Ok(())
    }

    fn on_write(&mut self) -> RedisResult<()> {
        while !self.outbuf.is_empty() {
            match self.stream.write(&self.outbuf) {
                Ok(0) => {
                    debug!("socket closed during write");
                    self.connected = false;
                    return Err(RedisError::ConnectionLost);
                }
                Ok(n) => {
                    trace!(bytes = n, "wrote");
                    self.outbuf.advance(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    return Err(RedisError::Io(e));
                }
            }
        }
        Ok(())
    }

    fn on_read(&mut self, out: &mut Vec<Completion>) -> RedisResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("peer closed connection");
                    self.connected = false;
                    break;
                }
                Ok(n) => {
                    trace!(bytes = n, "read");
                    self.inbuf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    return Err(RedisError::Io(e));
                }
            }
        }

        // Decode every complete reply; a partial tail stays buffered.
        while !self.inbuf.is_empty() {
            match decoder::decode(&self.inbuf) {
                Ok((reply, consumed)) => {
                    self.inbuf.advance(consumed);
                    if let Err(e) = self.route(reply, out) {
                        self.connected = false;
                        return Err(e);
                    }
                }
                Err(RedisError::Incomplete) => break,
                Err(e) => {
                    self.connected = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn wants_write(&self) -> bool {
        !self.outbuf.is_empty()
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Pub/sub traffic is an array (or RESP3 push) whose first element is one
/// of the six subscription tags.
fn is_pubsub_reply(reply: &Reply) -> bool {
    let items = match reply {
        Reply::Array(items) | Reply::Push(items) => items,
        _ => return false,
    };
    let tag = match items.first().and_then(|t| t.as_str()) {
        Some(tag) => tag,
        None => return false,
    };
    matches!(
        tag,
        "message" | "pmessage" | "subscribe" | "unsubscribe" | "psubscribe" | "punsubscribe"
    )
}
