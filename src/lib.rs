//! # riptide — asynchronous pipelined Redis client
//!
//! Commands are issued from tokio tasks as futures; a dedicated OS poll
//! thread owns the protocol engine and drives all socket I/O. Everything
//! issued during one scheduler turn is batched into a single pipelined
//! write.
//!
//! # Example
//! ```ignore
//! use riptide::Client;
//!
//! let client = Client::connect("127.0.0.1", 6379).await?;
//!
//! client.set("greeting", b"hello").await?;
//! let value = client.get_str("greeting").await?;
//! assert_eq!(value.as_deref(), Some("hello"));
//!
//! // Commands issued together share one write on the wire.
//! let a = client.send(["INCR", "counter"])?;
//! let b = client.send(["INCR", "counter"])?;
//! let (a, b) = (a.await?, b.await?);
//!
//! client.close().await;
//! ```
//!
//! ## Architecture
//!
//! | Piece | Role |
//! |-------|------|
//! | [`Client`] | host-facing façade: futures, pipelining, typed helpers |
//! | poll thread | sole owner of the protocol engine; blocks in `poll(2)` |
//! | [`ProtocolEngine`] | the wire seam; [`RespEngine`] in production |
//! | [`Subscription`] | dedicated connection per pub/sub subscription |

pub mod client;
pub mod cmd;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
mod event_loop;
pub mod pool;
mod queue;
pub mod reply;
pub mod subscribe;
mod wakeup;

pub use client::{Client, ClientConfig, Pending};
pub use cmd::Cmd;
pub use engine::{CallbackInfo, Completion, ProtocolEngine, RespEngine};
pub use error::{RedisError, RedisResult};
pub use pool::{PoolConfig, RedisPool};
pub use reply::Reply;
pub use subscribe::{PubSubKind, PubSubMessage, Subscription};

/// Commonly used types.
pub mod prelude {
    pub use crate::{Client, ClientConfig, Cmd, RedisError, RedisResult, Reply};
    pub use crate::{PoolConfig, RedisPool};
    pub use crate::{PubSubKind, PubSubMessage, Subscription};
}
