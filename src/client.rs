//! High-level Redis command client.
//!
//! # Example
//! ```ignore
//! use riptide::Client;
//!
//! let client = Client::connect("localhost", 6379).await?;
//!
//! client.set("key", b"value").await?;
//! let val = client.get("key").await?;
//! client.close().await;
//! ```
//!
//! Commands are enqueued eagerly and pipelined: everything issued during
//! one scheduler turn is pushed to the poll thread before any of it is
//! written, so the wire sees a single batched write. Awaiting the returned
//! future suspends only the calling task; all socket I/O happens on the
//! dedicated poll thread.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cmd::Cmd;
use crate::engine::{ProtocolEngine, RespEngine};
use crate::error::{RedisError, RedisResult};
use crate::event_loop::{EventLoop, Posted, ReplyPort};
use crate::queue::CommandNode;
use crate::reply::Reply;
use crate::subscribe::Subscription;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Host-side state shared between command callers and the listener task.
struct ClientShared {
    /// One oneshot slot per in-flight command, keyed by command id.
    pending: Mutex<HashMap<i64, oneshot::Sender<RedisResult<Reply>>>>,
    next_id: AtomicI64,
    closed: AtomicBool,
    flush_scheduled: AtomicBool,
}

impl ClientShared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            flush_scheduled: AtomicBool::new(false),
        }
    }
}

/// Asynchronous Redis client over one connection.
///
/// Cheap to share by reference: every command method takes `&self`.
pub struct Client {
    shared: Arc<ClientShared>,
    event_loop: Arc<EventLoop>,
    port: ReplyPort,
    config: Option<ClientConfig>,
}

/// Future for one in-flight command, resolved by the listener task.
pub struct Pending {
    rx: oneshot::Receiver<RedisResult<Reply>>,
}

impl Future for Pending {
    type Output = RedisResult<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(result) => result,
            // Sender dropped without completing: the client went away.
            Err(_) => Err(RedisError::Closed),
        })
    }
}

impl Client {
    /// Connect to a Redis server.
    pub async fn connect(host: impl Into<String>, port: u16) -> RedisResult<Self> {
        Self::connect_with(ClientConfig::new(host, port)).await
    }

    /// Connect using a full configuration.
    pub async fn connect_with(config: ClientConfig) -> RedisResult<Self> {
        let (host, port) = (config.host.clone(), config.port);
        // Name resolution and the TCP handshake block.
        let engine = tokio::task::spawn_blocking(move || RespEngine::connect(&host, port))
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))??;
        let mut client = Self::with_engine(Box::new(engine))?;
        client.config = Some(config);
        Ok(client)
    }

    /// Build a client over any [`ProtocolEngine`]. This is the seam the
    /// test suite uses to substitute scripted engines. Must be called from
    /// within a tokio runtime.
    pub fn with_engine(engine: Box<dyn ProtocolEngine>) -> RedisResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop::start(engine, tx.clone())?;
        let shared = Arc::new(ClientShared::new());
        tokio::spawn(listen(rx, shared.clone()));
        Ok(Self {
            shared,
            event_loop: Arc::new(event_loop),
            port: tx,
            config: None,
        })
    }

    /// Enqueue a command and return a future for its reply.
    ///
    /// The enqueue happens now; the write to the socket happens at the end
    /// of the current scheduler turn, batched with every other command
    /// issued this turn.
    pub fn send<I, A>(&self, args: I) -> RedisResult<Pending>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RedisError::Closed);
        }
        let argv: Vec<Vec<u8>> = args.into_iter().map(|a| a.as_ref().to_vec()).collect();
        if argv.is_empty() {
            return Err(RedisError::InvalidCommand("empty command".into()));
        }

        let command_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(command_id, tx);
        self.event_loop.enqueue(CommandNode {
            port: self.port.clone(),
            command_id,
            args: argv,
            persistent: false,
        });
        self.schedule_flush();
        Ok(Pending { rx })
    }

    /// Issue a command and await its reply.
    pub async fn command<I, A>(&self, args: I) -> RedisResult<Reply>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send(args)?.await
    }

    /// Execute a built [`Cmd`].
    pub async fn execute(&self, cmd: &Cmd) -> RedisResult<Reply> {
        self.command(cmd.args()).await
    }

    /// Schedule at most one poll-thread wakeup per scheduler turn. The
    /// spawned task runs once the current task yields, after every command
    /// of this turn has been enqueued.
    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let event_loop = self.event_loop.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.flush_scheduled.store(false, Ordering::Release);
            event_loop.wake();
        });
    }

    /// Close the client: stop and join the poll thread, then fail every
    /// still-pending command with [`RedisError::Closed`]. Idempotent;
    /// commands issued after `close()` fail immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing client");
        self.event_loop.stop();
        let event_loop = self.event_loop.clone();
        let _ = tokio::task::spawn_blocking(move || event_loop.join()).await;
        fail_all_pending(&self.shared, || RedisError::Closed);
    }

    /// Open a dedicated pub/sub connection to the same server. See
    /// [`Subscription`].
    pub async fn subscribe(
        &self,
        channels: &[&str],
        patterns: &[&str],
    ) -> RedisResult<Subscription> {
        match &self.config {
            Some(config) => Subscription::open(config.clone(), channels, patterns).await,
            None => Err(RedisError::Connection(
                "no server address known for a dedicated subscription connection".into(),
            )),
        }
    }

    // ========== Convenience Methods ==========

    /// PING
    pub async fn ping(&self) -> RedisResult<bool> {
        match self.command(["PING"]).await? {
            Reply::Status(s) if s == "PONG" => Ok(true),
            Reply::Data(b) if b == b"PONG" => Ok(true),
            _ => Ok(false),
        }
    }

    /// GET key
    pub async fn get(&self, key: &str) -> RedisResult<Option<Vec<u8>>> {
        match self.command([b"GET".as_slice(), key.as_bytes()]).await? {
            Reply::Nil => Ok(None),
            Reply::Data(data) => Ok(Some(data)),
            Reply::Status(s) => Ok(Some(s.into_bytes())),
            other => Err(RedisError::Protocol(format!(
                "Unexpected GET response: {:?}",
                other
            ))),
        }
    }

    /// GET key as string
    pub async fn get_str(&self, key: &str) -> RedisResult<Option<String>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|e| RedisError::Protocol(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// SET key value
    pub async fn set(&self, key: &str, value: &[u8]) -> RedisResult<()> {
        self.command([b"SET".as_slice(), key.as_bytes(), value])
            .await?;
        Ok(())
    }

    /// SET key value EX seconds
    pub async fn set_ex(&self, key: &str, value: &[u8], seconds: i64) -> RedisResult<()> {
        let cmd = Cmd::new("SET").arg(key).arg(value).ex(seconds);
        self.execute(&cmd).await?;
        Ok(())
    }

    /// DEL key
    pub async fn del(&self, key: &str) -> RedisResult<i64> {
        self.int_command([b"DEL".as_slice(), key.as_bytes()], "DEL")
            .await
    }

    /// INCR key
    pub async fn incr(&self, key: &str) -> RedisResult<i64> {
        self.int_command([b"INCR".as_slice(), key.as_bytes()], "INCR")
            .await
    }

    /// TTL key
    pub async fn ttl(&self, key: &str) -> RedisResult<i64> {
        self.int_command([b"TTL".as_slice(), key.as_bytes()], "TTL")
            .await
    }

    /// EXPIRE key seconds
    pub async fn expire(&self, key: &str, seconds: i64) -> RedisResult<bool> {
        let secs = seconds.to_string();
        let n = self
            .int_command(
                [b"EXPIRE".as_slice(), key.as_bytes(), secs.as_bytes()],
                "EXPIRE",
            )
            .await?;
        Ok(n == 1)
    }

    /// EXISTS key
    pub async fn exists(&self, key: &str) -> RedisResult<bool> {
        let n = self
            .int_command([b"EXISTS".as_slice(), key.as_bytes()], "EXISTS")
            .await?;
        Ok(n > 0)
    }

    /// PUBLISH channel message; returns the number of receivers.
    pub async fn publish(&self, channel: &str, message: &[u8]) -> RedisResult<i64> {
        self.int_command(
            [b"PUBLISH".as_slice(), channel.as_bytes(), message],
            "PUBLISH",
        )
        .await
    }

    async fn int_command<I, A>(&self, args: I, name: &str) -> RedisResult<i64>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        match self.command(args).await? {
            Reply::Integer(n) => Ok(n),
            other => Err(RedisError::Protocol(format!(
                "Unexpected {} response: {:?}",
                name, other
            ))),
        }
    }
}

/// Listener task: resolves pending slots as the poll thread posts
/// completions, in submission order per connection.
async fn listen(mut rx: mpsc::UnboundedReceiver<Posted>, shared: Arc<ClientShared>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Posted::Completion { command_id, reply } => {
                let slot = shared.pending.lock().unwrap().remove(&command_id);
                if let Some(tx) = slot {
                    let result = match reply {
                        Reply::Error(message) => Err(RedisError::Redis(message)),
                        other => Ok(other),
                    };
                    let _ = tx.send(result);
                }
                // Unknown ids belong to cancelled or already-failed
                // commands and are dropped.
            }
            Posted::Disconnect => {
                debug!("event loop disconnected");
                // A user-initiated close fails pending slots with Closed;
                // an unexpected disconnect with ConnectionLost.
                let was_closed = shared.closed.swap(true, Ordering::AcqRel);
                if was_closed {
                    fail_all_pending(&shared, || RedisError::Closed);
                } else {
                    fail_all_pending(&shared, || RedisError::ConnectionLost);
                }
                break;
            }
        }
    }
}

fn fail_all_pending(shared: &ClientShared, make_error: impl Fn() -> RedisError) {
    let slots: Vec<_> = {
        let mut pending = shared.pending.lock().unwrap();
        pending.drain().map(|(_, tx)| tx).collect()
    };
    for tx in slots {
        let _ = tx.send(Err(make_error()));
    }
}
