//! RESP protocol decoder.
//!
//! Parses Redis wire protocol replies into owned [`Reply`] trees. The
//! decoder is incremental: a buffer ending in the middle of a value yields
//! [`RedisError::Incomplete`], and the caller retries once more bytes have
//! arrived. Covers RESP2 plus the RESP3 types (null, boolean, double, big
//! number, verbatim string, map, set, push).

use bytes::Buf;

use crate::error::{RedisError, RedisResult};
use crate::reply::Reply;

/// Decode one reply from the buffer.
///
/// Returns the parsed reply and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> RedisResult<(Reply, usize)> {
    if buf.is_empty() {
        return Err(RedisError::Incomplete);
    }

    let mut cursor = std::io::Cursor::new(buf);
    let reply = decode_reply(&mut cursor)?;
    Ok((reply, cursor.position() as usize))
}

/// Decode a single RESP value at the cursor.
fn decode_reply(cursor: &mut std::io::Cursor<&[u8]>) -> RedisResult<Reply> {
    if !cursor.has_remaining() {
        return Err(RedisError::Incomplete);
    }

    let type_byte = cursor.get_u8();

    match type_byte {
        // Simple string: +OK\r\n
        b'+' => {
            let line = read_line(cursor)?;
            Ok(Reply::Status(line))
        }

        // Error: -ERR message\r\n
        b'-' => {
            let line = read_line(cursor)?;
            Ok(Reply::Error(line))
        }

        // Integer: :1000\r\n
        b':' => {
            let line = read_line(cursor)?;
            let num: i64 = line
                .parse()
                .map_err(|_| RedisError::Protocol(format!("Invalid integer: {}", line)))?;
            Ok(Reply::Integer(num))
        }

        // Bulk string: $5\r\nhello\r\n ($-1 is the RESP2 nil)
        b'$' => {
            let len = read_length(cursor, "bulk length")?;
            if len < 0 {
                return Ok(Reply::Nil);
            }

            let len = len as usize;
            if cursor.remaining() < len + 2 {
                return Err(RedisError::Incomplete);
            }

            let mut data = vec![0u8; len];
            cursor.copy_to_slice(&mut data);
            expect_crlf(cursor)?;
            Ok(Reply::Data(data))
        }

        // Array: *2\r\n... (*-1 is the RESP2 nil array)
        b'*' => {
            let count = read_length(cursor, "array length")?;
            if count < 0 {
                return Ok(Reply::Nil);
            }
            Ok(Reply::Array(decode_elements(cursor, count as usize)?))
        }

        // Null: _\r\n (RESP3)
        b'_' => {
            read_line(cursor)?;
            Ok(Reply::Nil)
        }

        // Boolean: #t\r\n or #f\r\n (RESP3)
        b'#' => {
            let line = read_line(cursor)?;
            match line.as_str() {
                "t" => Ok(Reply::Bool(true)),
                "f" => Ok(Reply::Bool(false)),
                _ => Err(RedisError::Protocol(format!("Invalid boolean: {}", line))),
            }
        }

        // Double: ,1.23\r\n (RESP3); textual form is kept
        b',' => {
            let line = read_line(cursor)?;
            if line.parse::<f64>().is_err() {
                return Err(RedisError::Protocol(format!("Invalid double: {}", line)));
            }
            Ok(Reply::Double(line))
        }

        // Big number: (3492890328409238509324850943850943825024385\r\n (RESP3)
        b'(' => {
            let line = read_line(cursor)?;
            Ok(Reply::BigNum(line))
        }

        // Verbatim string: =15\r\ntxt:Some string\r\n (RESP3)
        b'=' => {
            let len = read_length(cursor, "verbatim length")?;
            if len < 4 {
                return Err(RedisError::Protocol("Verbatim string too short".into()));
            }
            let len = len as usize;
            if cursor.remaining() < len + 2 {
                return Err(RedisError::Incomplete);
            }
            let mut data = vec![0u8; len];
            cursor.copy_to_slice(&mut data);
            expect_crlf(cursor)?;
            // Strip the "txt:"/"mkd:" format prefix.
            let text = std::str::from_utf8(&data[4..])
                .map_err(|_| RedisError::Protocol("Invalid UTF-8 in verbatim string".into()))?;
            Ok(Reply::Verbatim(text.to_string()))
        }

        // Map: %2\r\n... (RESP3), decoded as flattened key/value pairs
        b'%' => {
            let count = read_length(cursor, "map length")?;
            if count < 0 {
                return Ok(Reply::Nil);
            }
            Ok(Reply::Map(decode_elements(cursor, count as usize * 2)?))
        }

        // Set: ~3\r\n... (RESP3)
        b'~' => {
            let count = read_length(cursor, "set length")?;
            if count < 0 {
                return Ok(Reply::Nil);
            }
            Ok(Reply::Set(decode_elements(cursor, count as usize)?))
        }

        // Push: >4\r\n... (RESP3 out-of-band)
        b'>' => {
            let count = read_length(cursor, "push length")?;
            if count < 0 {
                return Err(RedisError::Protocol("Negative push length".into()));
            }
            Ok(Reply::Push(decode_elements(cursor, count as usize)?))
        }

        _ => Err(RedisError::Protocol(format!(
            "Unknown type byte: {}",
            type_byte as char
        ))),
    }
}

fn decode_elements(cursor: &mut std::io::Cursor<&[u8]>, count: usize) -> RedisResult<Vec<Reply>> {
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(decode_reply(cursor)?);
    }
    Ok(items)
}

/// Read a decimal length header line.
fn read_length(cursor: &mut std::io::Cursor<&[u8]>, what: &str) -> RedisResult<i64> {
    let line = read_line(cursor)?;
    line.parse()
        .map_err(|_| RedisError::Protocol(format!("Invalid {}: {}", what, line)))
}

/// Read a line up to \r\n.
fn read_line(cursor: &mut std::io::Cursor<&[u8]>) -> RedisResult<String> {
    let start = cursor.position() as usize;
    let buf = cursor.get_ref();

    let mut end = start;
    while end + 1 < buf.len() {
        if buf[end] == b'\r' && buf[end + 1] == b'\n' {
            let line = std::str::from_utf8(&buf[start..end])
                .map_err(|_| RedisError::Protocol("Invalid UTF-8".into()))?;
            cursor.set_position((end + 2) as u64);
            return Ok(line.to_string());
        }
        end += 1;
    }

    Err(RedisError::Incomplete)
}

fn expect_crlf(cursor: &mut std::io::Cursor<&[u8]>) -> RedisResult<()> {
    if cursor.remaining() < 2 {
        return Err(RedisError::Incomplete);
    }
    let cr = cursor.get_u8();
    let lf = cursor.get_u8();
    if cr != b'\r' || lf != b'\n' {
        return Err(RedisError::Protocol("Missing CRLF terminator".into()));
    }
    Ok(())
}
