//! Fluent command builder.
//!
//! Assembles binary-safe argv for [`Client::execute`]. The option helpers
//! cover the common SET modifiers.
//!
//! # Example
//! ```ignore
//! use riptide::Cmd;
//!
//! // SET with TTL, only if absent
//! let cmd = Cmd::new("SET").arg("session:123").arg(b"data").ex(3600).nx();
//! client.execute(&cmd).await?;
//! ```
//!
//! [`Client::execute`]: crate::Client::execute

/// A command under construction: the name plus its arguments, in order.
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

impl Cmd {
    /// Start a command.
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Append one argument. Bytes are copied; the builder owns its argv.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// The assembled argv.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Add EX (seconds) expiry.
    pub fn ex(self, seconds: i64) -> Self {
        self.arg("EX").arg(seconds.to_string())
    }

    /// Add PX (milliseconds) expiry.
    pub fn px(self, milliseconds: i64) -> Self {
        self.arg("PX").arg(milliseconds.to_string())
    }

    /// Only set if the key does not exist.
    pub fn nx(self) -> Self {
        self.arg("NX")
    }

    /// Only set if the key exists.
    pub fn xx(self) -> Self {
        self.arg("XX")
    }
}
