//! RESP protocol encoder.
//!
//! Commands go on the wire as arrays of bulk strings, which is binary-safe
//! for every argument byte including CR, LF and NUL.

use bytes::BytesMut;

use crate::reply::Reply;

/// Encode a command (argv form) to RESP bytes.
pub fn encode_command(args: &[Vec<u8>]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    encode_command_into(&mut buf, args);
    buf
}

/// Encode a command into the provided buffer.
pub fn encode_command_into(buf: &mut BytesMut, args: &[Vec<u8>]) {
    encode_array_header(buf, args.len());
    for arg in args {
        encode_bulk_string(buf, arg);
    }
}

/// Encode a reply back to its wire form.
///
/// This is the natural re-encode of a [`Reply`]: `decode(encode_reply(r))`
/// yields `r` again. Used by the tests and by in-process servers.
pub fn encode_reply(buf: &mut BytesMut, reply: &Reply) {
    match reply {
        Reply::Nil => buf.extend_from_slice(b"$-1\r\n"),
        Reply::Status(s) => {
            buf.extend_from_slice(b"+");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(s) => {
            buf.extend_from_slice(b"-");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Integer(n) => {
            buf.extend_from_slice(b":");
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Double(s) => {
            buf.extend_from_slice(b",");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Bool(b) => {
            buf.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
        }
        Reply::BigNum(s) => {
            buf.extend_from_slice(b"(");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Verbatim(s) => {
            // txt: prefix plus payload, counted together
            buf.extend_from_slice(b"=");
            buf.extend_from_slice((s.len() + 4).to_string().as_bytes());
            buf.extend_from_slice(b"\r\ntxt:");
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Data(data) => encode_bulk_string(buf, data),
        Reply::Array(items) => encode_aggregate(buf, b'*', items.len(), items),
        Reply::Map(items) => {
            debug_assert!(items.len() % 2 == 0);
            encode_aggregate(buf, b'%', items.len() / 2, items);
        }
        Reply::Set(items) => encode_aggregate(buf, b'~', items.len(), items),
        Reply::Push(items) => encode_aggregate(buf, b'>', items.len(), items),
    }
}

// ========== RESP Primitives ==========

/// Encode array header: *<count>\r\n
fn encode_array_header(buf: &mut BytesMut, count: usize) {
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Encode bulk string: $<len>\r\n<data>\r\n
fn encode_bulk_string(buf: &mut BytesMut, data: &[u8]) {
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn encode_aggregate(buf: &mut BytesMut, tag: u8, count: usize, items: &[Reply]) {
    buf.extend_from_slice(&[tag]);
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    for item in items {
        encode_reply(buf, item);
    }
}
