//! Pub/sub subscriptions.
//!
//! A Redis connection in subscribe mode accepts only subscription
//! management commands, so each [`Subscription`] owns a dedicated
//! connection and event loop. The SUBSCRIBE/PSUBSCRIBE commands are
//! submitted with a persistent callback: every matching message the server
//! pushes comes back through the same port, and [`Subscription::recv`]
//! exposes them as a lazy sequence. Dropping or closing the subscription
//! tears the dedicated loop down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ClientConfig;
use crate::engine::{ProtocolEngine, RespEngine};
use crate::error::{RedisError, RedisResult};
use crate::event_loop::{EventLoop, Posted};
use crate::queue::CommandNode;
use crate::reply::Reply;

/// Which pub/sub command produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubKind {
    /// Direct channel message.
    Message,
    /// Message delivered through a pattern subscription.
    PMessage,
}

/// One delivered pub/sub message.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubMessage {
    pub kind: PubSubKind,
    /// Channel the message was published to.
    pub channel: String,
    /// Published payload, binary-safe.
    pub payload: Vec<u8>,
    /// The matching pattern, for [`PubSubKind::PMessage`].
    pub pattern: Option<String>,
}

/// Decoded subscription traffic.
#[derive(Debug)]
enum PubSubEvent {
    Data(PubSubMessage),
    /// Subscription confirmation carrying the active subscription count.
    Subscribed(i64),
    /// Unsubscription confirmation carrying the remaining count.
    Unsubscribed(i64),
}

/// A live subscription: a lazy sequence of [`PubSubMessage`]s backed by a
/// dedicated connection.
pub struct Subscription {
    event_loop: Arc<EventLoop>,
    rx: mpsc::UnboundedReceiver<Posted>,
    /// Server-confirmed subscription count.
    active: i64,
    done: bool,
}

impl Subscription {
    /// Open a dedicated connection and subscribe. At least one channel or
    /// pattern is required.
    pub async fn open(
        config: ClientConfig,
        channels: &[&str],
        patterns: &[&str],
    ) -> RedisResult<Self> {
        if channels.is_empty() && patterns.is_empty() {
            return Err(RedisError::InvalidCommand(
                "subscribe requires at least one channel or pattern".into(),
            ));
        }
        let (host, port) = (config.host.clone(), config.port);
        let engine = tokio::task::spawn_blocking(move || RespEngine::connect(&host, port))
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))??;
        Self::with_engine(Box::new(engine), channels, patterns)
    }

    /// Subscribe over any [`ProtocolEngine`]. Must be called from within a
    /// tokio runtime.
    pub fn with_engine(
        engine: Box<dyn ProtocolEngine>,
        channels: &[&str],
        patterns: &[&str],
    ) -> RedisResult<Self> {
        if channels.is_empty() && patterns.is_empty() {
            return Err(RedisError::InvalidCommand(
                "subscribe requires at least one channel or pattern".into(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop::start(engine, tx.clone())?;

        if !channels.is_empty() {
            let mut args = vec![b"SUBSCRIBE".to_vec()];
            args.extend(channels.iter().map(|c| c.as_bytes().to_vec()));
            event_loop.enqueue(CommandNode {
                port: tx.clone(),
                command_id: 1,
                args,
                persistent: true,
            });
        }
        if !patterns.is_empty() {
            let mut args = vec![b"PSUBSCRIBE".to_vec()];
            args.extend(patterns.iter().map(|p| p.as_bytes().to_vec()));
            event_loop.enqueue(CommandNode {
                port: tx,
                command_id: 2,
                args,
                persistent: true,
            });
        }
        event_loop.wake();

        Ok(Self {
            event_loop: Arc::new(event_loop),
            rx,
            active: 0,
            done: false,
        })
    }

    /// Wait for the next message.
    ///
    /// Management confirmations are absorbed into the subscription count;
    /// only `message`/`pmessage` traffic is yielded. Returns `None` once
    /// every subscription is gone or the connection dropped.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        if self.done {
            return None;
        }
        while let Some(msg) = self.rx.recv().await {
            match msg {
                Posted::Disconnect => {
                    debug!("subscription event loop disconnected");
                    self.done = true;
                    return None;
                }
                Posted::Completion { reply, .. } => match decode_event(reply) {
                    Ok(PubSubEvent::Data(message)) => return Some(message),
                    Ok(PubSubEvent::Subscribed(count)) => self.active = count,
                    Ok(PubSubEvent::Unsubscribed(count)) => {
                        self.active = count;
                        if count == 0 {
                            self.done = true;
                            return None;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed pub/sub reply"),
                },
            }
        }
        self.done = true;
        None
    }

    /// Tear the dedicated connection down. Dropping the subscription has
    /// the same effect.
    pub async fn close(self) {
        self.event_loop.stop();
        let event_loop = self.event_loop.clone();
        let _ = tokio::task::spawn_blocking(move || event_loop.join()).await;
    }
}

/// Decode one subscription reply. The shape is an array (or RESP3 push)
/// tagged by its first element; dispatch is by tag, with the documented
/// element counts checked in debug builds.
fn decode_event(reply: Reply) -> RedisResult<PubSubEvent> {
    let items = match reply {
        Reply::Array(items) | Reply::Push(items) => items,
        other => {
            return Err(RedisError::Protocol(format!(
                "Unexpected pub/sub reply: {:?}",
                other
            )))
        }
    };
    let tag = items
        .first()
        .and_then(|t| t.as_str())
        .map(str::to_owned)
        .ok_or_else(|| RedisError::Protocol("Missing pub/sub tag".into()))?;
    let mut fields = items.into_iter().skip(1);

    match tag.as_str() {
        "message" => {
            let channel = text_field(fields.next(), "channel")?;
            let payload = data_field(fields.next(), "payload")?;
            debug_assert!(fields.next().is_none());
            Ok(PubSubEvent::Data(PubSubMessage {
                kind: PubSubKind::Message,
                channel,
                payload,
                pattern: None,
            }))
        }
        "pmessage" => {
            let pattern = text_field(fields.next(), "pattern")?;
            let channel = text_field(fields.next(), "channel")?;
            let payload = data_field(fields.next(), "payload")?;
            debug_assert!(fields.next().is_none());
            Ok(PubSubEvent::Data(PubSubMessage {
                kind: PubSubKind::PMessage,
                channel,
                payload,
                pattern: Some(pattern),
            }))
        }
        "subscribe" | "psubscribe" => {
            let _target = fields.next();
            let count = int_field(fields.next(), "subscription count")?;
            Ok(PubSubEvent::Subscribed(count))
        }
        "unsubscribe" | "punsubscribe" => {
            let _target = fields.next();
            let count = int_field(fields.next(), "subscription count")?;
            Ok(PubSubEvent::Unsubscribed(count))
        }
        other => Err(RedisError::Protocol(format!(
            "Unknown pub/sub tag: {}",
            other
        ))),
    }
}

fn text_field(reply: Option<Reply>, what: &str) -> RedisResult<String> {
    match reply {
        Some(Reply::Data(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
        Some(Reply::Status(s)) | Some(Reply::Verbatim(s)) => Ok(s),
        other => Err(RedisError::Protocol(format!(
            "Bad pub/sub {}: {:?}",
            what, other
        ))),
    }
}

fn data_field(reply: Option<Reply>, what: &str) -> RedisResult<Vec<u8>> {
    match reply {
        Some(Reply::Data(b)) => Ok(b),
        Some(Reply::Status(s)) => Ok(s.into_bytes()),
        other => Err(RedisError::Protocol(format!(
            "Bad pub/sub {}: {:?}",
            what, other
        ))),
    }
}

fn int_field(reply: Option<Reply>, what: &str) -> RedisResult<i64> {
    match reply {
        Some(Reply::Integer(n)) => Ok(n),
        other => Err(RedisError::Protocol(format!(
            "Bad pub/sub {}: {:?}",
            what, other
        ))),
    }
}
