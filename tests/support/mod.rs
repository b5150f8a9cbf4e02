//! Shared test infrastructure: a scripted protocol engine and a minimal
//! in-process RESP server, so the end-to-end suites run without an
//! external Redis.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use riptide::{decoder, encoder, CallbackInfo, Completion, ProtocolEngine, RedisError, RedisResult, Reply};

// ========== Scripted engine ==========

/// Maps submitted argv to a reply; `None` means the command never
/// completes (a blocking server-side command).
pub type Script = Box<dyn FnMut(&[Vec<u8>]) -> Option<Reply> + Send>;

/// Counters observable from the test while the engine lives on the poll
/// thread.
#[derive(Clone)]
pub struct MockStats {
    pub on_write_calls: Arc<AtomicUsize>,
    pub submitted: Arc<AtomicUsize>,
}

/// A [`ProtocolEngine`] driven by a script instead of a socket.
///
/// Replies staged by `submit` become readable only after `on_write` runs,
/// mirroring the real flush-then-read cycle; an internal socketpair gives
/// the poll thread a real fd to multiplex on.
pub struct MockEngine {
    script: Script,
    signal_read: RawFd,
    signal_write: RawFd,
    staged: Vec<Completion>,
    ready: Vec<Completion>,
    pending_out: bool,
    connected: bool,
    stats: MockStats,
}

impl MockEngine {
    pub fn new(script: Script) -> (Self, MockStats) {
        let mut fds = [0i32; 2];
        let ret =
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "socketpair failed");
        unsafe {
            let flags = libc::fcntl(fds[0], libc::F_GETFL);
            libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        let stats = MockStats {
            on_write_calls: Arc::new(AtomicUsize::new(0)),
            submitted: Arc::new(AtomicUsize::new(0)),
        };
        (
            Self {
                script,
                signal_read: fds[0],
                signal_write: fds[1],
                staged: Vec::new(),
                ready: Vec::new(),
                pending_out: false,
                connected: true,
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl ProtocolEngine for MockEngine {
    fn submit(&mut self, args: &[Vec<u8>], info: CallbackInfo) -> RedisResult<()> {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = (self.script)(args) {
            self.staged.push(Completion {
                info,
                reply: Some(reply),
            });
        }
        self.pending_out = true;
        Ok(())
    }

    fn on_write(&mut self) -> RedisResult<()> {
        self.stats.on_write_calls.fetch_add(1, Ordering::SeqCst);
        self.pending_out = false;
        if !self.staged.is_empty() {
            self.ready.append(&mut self.staged);
            let byte = 1u8;
            unsafe { libc::write(self.signal_write, &byte as *const u8 as *const libc::c_void, 1) };
        }
        Ok(())
    }

    fn on_read(&mut self, out: &mut Vec<Completion>) -> RedisResult<()> {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.signal_read, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
        out.append(&mut self.ready);
        Ok(())
    }

    fn fd(&self) -> RawFd {
        self.signal_read
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn wants_write(&self) -> bool {
        self.pending_out
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.signal_read);
            libc::close(self.signal_write);
        }
    }
}

// ========== In-process RESP server ==========

struct SubEntry {
    channels: Vec<String>,
    patterns: Vec<String>,
    stream: TcpStream,
}

#[derive(Default)]
struct ServerState {
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    subscribers: Mutex<Vec<SubEntry>>,
    /// Live client connections; drops to zero when clients hang up.
    connections: AtomicUsize,
}

/// A minimal Redis look-alike: PING, ECHO, SET/GET/DEL/INCR/EXISTS,
/// SUBSCRIBE/PSUBSCRIBE/PUBLISH, and a BLPOP that never replies.
pub struct RespServer {
    port: u16,
    state: Arc<ServerState>,
}

impl RespServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(ServerState::default());
        let accept_state = state.clone();
        std::thread::spawn(move || {
            for conn in listener.incoming() {
                match conn {
                    Ok(stream) => {
                        let state = accept_state.clone();
                        state.connections.fetch_add(1, Ordering::SeqCst);
                        std::thread::spawn(move || {
                            handle_conn(stream, &state);
                            state.connections.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(_) => break,
                }
            }
        });
        Self { port, state }
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of registered subscription entries; tests use this to wait
    /// for a SUBSCRIBE to land before publishing.
    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.lock().unwrap().len()
    }

    /// Number of client connections still open on the server side.
    pub fn open_connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn handle_conn(mut stream: TcpStream, state: &Arc<ServerState>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while !buf.is_empty() {
            match decoder::decode(&buf) {
                Ok((request, consumed)) => {
                    buf.drain(..consumed);
                    if !dispatch(request, &mut stream, state) {
                        return;
                    }
                }
                Err(RedisError::Incomplete) => break,
                Err(_) => return,
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn dispatch(request: Reply, stream: &mut TcpStream, state: &Arc<ServerState>) -> bool {
    let args: Vec<Vec<u8>> = match request {
        Reply::Array(items) => items
            .into_iter()
            .map(|r| match r {
                Reply::Data(b) => b,
                other => format!("{:?}", other).into_bytes(),
            })
            .collect(),
        _ => return false,
    };
    if args.is_empty() {
        return false;
    }
    let name = String::from_utf8_lossy(&args[0]).to_uppercase();

    let reply = match name.as_str() {
        "PING" => Reply::Status("PONG".into()),
        "ECHO" => Reply::Data(args[1].clone()),
        "SET" => {
            let mut store = state.store.lock().unwrap();
            store.insert(args[1].clone(), args[2].clone());
            Reply::Status("OK".into())
        }
        "GET" => {
            let store = state.store.lock().unwrap();
            match store.get(&args[1]) {
                Some(v) => Reply::Data(v.clone()),
                None => Reply::Nil,
            }
        }
        "DEL" => {
            let mut store = state.store.lock().unwrap();
            let removed = store.remove(&args[1]).is_some();
            Reply::Integer(removed as i64)
        }
        "INCR" => {
            let mut store = state.store.lock().unwrap();
            let current: i64 = store
                .get(&args[1])
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let next = current + 1;
            store.insert(args[1].clone(), next.to_string().into_bytes());
            Reply::Integer(next)
        }
        "EXISTS" => {
            let store = state.store.lock().unwrap();
            Reply::Integer(store.contains_key(&args[1]) as i64)
        }
        // Blocking command: never reply, keep the connection open.
        "BLPOP" => return true,
        "SUBSCRIBE" => {
            let channels: Vec<String> = args[1..]
                .iter()
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect();
            for (i, ch) in channels.iter().enumerate() {
                let confirm = Reply::Array(vec![
                    Reply::Data(b"subscribe".to_vec()),
                    Reply::Data(ch.as_bytes().to_vec()),
                    Reply::Integer(i as i64 + 1),
                ]);
                if !write_reply(stream, &confirm) {
                    return false;
                }
            }
            if let Ok(clone) = stream.try_clone() {
                state.subscribers.lock().unwrap().push(SubEntry {
                    channels,
                    patterns: Vec::new(),
                    stream: clone,
                });
            }
            return true;
        }
        "PSUBSCRIBE" => {
            let patterns: Vec<String> = args[1..]
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect();
            for (i, pat) in patterns.iter().enumerate() {
                let confirm = Reply::Array(vec![
                    Reply::Data(b"psubscribe".to_vec()),
                    Reply::Data(pat.as_bytes().to_vec()),
                    Reply::Integer(i as i64 + 1),
                ]);
                if !write_reply(stream, &confirm) {
                    return false;
                }
            }
            if let Ok(clone) = stream.try_clone() {
                state.subscribers.lock().unwrap().push(SubEntry {
                    channels: Vec::new(),
                    patterns,
                    stream: clone,
                });
            }
            return true;
        }
        "PUBLISH" => {
            let channel = String::from_utf8_lossy(&args[1]).into_owned();
            let payload = args[2].clone();
            let mut receivers = 0i64;
            let mut subs = state.subscribers.lock().unwrap();
            for entry in subs.iter_mut() {
                if entry.channels.iter().any(|c| c == &channel) {
                    let msg = Reply::Array(vec![
                        Reply::Data(b"message".to_vec()),
                        Reply::Data(channel.as_bytes().to_vec()),
                        Reply::Data(payload.clone()),
                    ]);
                    if write_reply(&mut entry.stream, &msg) {
                        receivers += 1;
                    }
                }
                for pat in &entry.patterns {
                    if glob_match(pat, &channel) {
                        let msg = Reply::Array(vec![
                            Reply::Data(b"pmessage".to_vec()),
                            Reply::Data(pat.as_bytes().to_vec()),
                            Reply::Data(channel.as_bytes().to_vec()),
                            Reply::Data(payload.clone()),
                        ]);
                        if write_reply(&mut entry.stream, &msg) {
                            receivers += 1;
                        }
                    }
                }
            }
            Reply::Integer(receivers)
        }
        other => Reply::Error(format!("ERR unknown command '{}'", other)),
    };

    write_reply(stream, &reply)
}

fn write_reply<W: Write>(stream: &mut W, reply: &Reply) -> bool {
    let mut buf = BytesMut::new();
    encoder::encode_reply(&mut buf, reply);
    stream.write_all(&buf).is_ok()
}

/// Trailing-star globs are all the tests need.
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}
