//! Reply values returned from Redis.
//!
//! A [`Reply`] is a fully owned tree: it is built on the poll thread as the
//! wire bytes are decoded, then handed to the waiting task over a channel.
//! Nothing in it borrows from the read buffer, so it is safe to inspect at
//! any later time on any thread.

/// A value returned from Redis.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Null value (key doesn't exist, nil bulk/array, RESP3 `_`)
    Nil,
    /// Simple string (status replies like "OK")
    Status(String),
    /// Error reply from the server
    Error(String),
    /// Integer
    Integer(i64),
    /// Double (RESP3); the textual form is kept so re-encoding is lossless
    Double(String),
    /// Boolean (RESP3)
    Bool(bool),
    /// Big number (RESP3), textual form
    BigNum(String),
    /// Verbatim string (RESP3), format prefix stripped
    Verbatim(String),
    /// Bulk string (actual data, binary-safe)
    Data(Vec<u8>),
    /// Array of replies
    Array(Vec<Reply>),
    /// Map (RESP3), flattened key/value pairs — always even length
    Map(Vec<Reply>),
    /// Set (RESP3)
    Set(Vec<Reply>),
    /// Out-of-band push (RESP3)
    Push(Vec<Reply>),
}

impl Reply {
    /// Try to get as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) | Reply::Verbatim(s) => Some(s),
            Reply::Data(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Data(b) => Some(b),
            Reply::Status(s) | Reply::Verbatim(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(b) => Some(*b),
            Reply::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as float, parsing the textual double form.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reply::Double(s) => s.parse().ok(),
            Reply::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get the elements of an aggregate reply.
    pub fn as_slice(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) | Reply::Map(items) | Reply::Set(items) | Reply::Push(items) => {
                Some(items)
            }
            _ => None,
        }
    }

    /// Check if nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Check if error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}
