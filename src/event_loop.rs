//! The per-connection event loop.
//!
//! One dedicated OS thread owns the protocol engine for the life of the
//! connection. It alternates between submitting queued commands and driving
//! socket I/O, blocking in a single `poll(2)` on the socket and the wakeup
//! pipe — no busy-polling, no timers. Completions leave the thread through
//! [`ReplyPort`]s; when the loop exits it shuts the engine down, releases
//! it, and posts exactly one disconnect sentinel so the host side can fail
//! whatever is still pending. The protocol context is therefore gone by the
//! time a join returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::{CallbackInfo, Completion, ProtocolEngine};
use crate::error::RedisResult;
use crate::queue::{CommandNode, CommandQueue};
use crate::reply::Reply;
use crate::wakeup::WakeupChannel;

/// Message posted from the poll thread to the host regime.
#[derive(Debug)]
pub(crate) enum Posted {
    /// Disconnect sentinel: the event loop is gone.
    Disconnect,
    /// One completed command.
    Completion { command_id: i64, reply: Reply },
}

/// Where the poll thread posts messages; usable from any thread, received
/// by the client's listener task.
pub(crate) type ReplyPort = mpsc::UnboundedSender<Posted>;

struct LoopShared {
    queue: CommandQueue,
    wakeup: WakeupChannel,
    /// Context mutex: serializes submission with the I/O handlers. Held
    /// only on the poll thread, which empties the slot when it exits.
    engine: Mutex<Option<Box<dyn ProtocolEngine>>>,
    stop: AtomicBool,
    /// The port the disconnect sentinel goes to.
    port: ReplyPort,
}

/// Owns the queue, the wakeup channel, the engine and the poll thread.
/// Teardown order is fixed: stop flag, wake, join. The poll thread
/// disconnects and releases the engine on its way out, so the protocol
/// context is freed before any join returns; dropping the loop afterwards
/// frees the queued nodes.
pub(crate) struct EventLoop {
    shared: Arc<LoopShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawn the poll thread over an already-connected engine.
    pub fn start(engine: Box<dyn ProtocolEngine>, port: ReplyPort) -> RedisResult<Self> {
        let shared = Arc::new(LoopShared {
            queue: CommandQueue::new(),
            wakeup: WakeupChannel::new()?,
            engine: Mutex::new(Some(engine)),
            stop: AtomicBool::new(false),
            port,
        });
        let thread = std::thread::Builder::new()
            .name("riptide-poll".into())
            .spawn({
                let shared = shared.clone();
                move || poll_loop(&shared)
            })
            .map_err(crate::error::RedisError::Io)?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Push a command node. Does not wake the poll thread; the flush path
    /// does that once per batch.
    pub fn enqueue(&self, node: CommandNode) {
        self.shared.queue.push(node);
    }

    pub fn wake(&self) {
        let _ = self.shared.wakeup.wake();
    }

    /// Request shutdown: the poll thread exits before its next wait.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let _ = self.shared.wakeup.wake();
    }

    /// Join the poll thread. Idempotent. Blocks; callers on a runtime wrap
    /// this in `spawn_blocking`.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("poll thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn poll_loop(shared: &LoopShared) {
    debug!("poll thread started");
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        // Submit everything queued, under the context mutex. The fd and
        // write interest are sampled after submission so freshly formatted
        // output registers for POLLOUT in the same iteration.
        let (fd, wants_write) = {
            let mut guard = shared.engine.lock().unwrap();
            let Some(engine) = guard.as_mut() else { break };
            if !engine.is_connected() || engine.fd() < 0 {
                break;
            }
            for node in shared.queue.drain_all() {
                let info = if node.persistent {
                    CallbackInfo::persistent(node.port.clone(), node.command_id)
                } else {
                    CallbackInfo::new(node.port.clone(), node.command_id)
                };
                if let Err(e) = engine.submit(&node.args, info) {
                    warn!(id = node.command_id, error = %e, "command submission failed");
                    let _ = node.port.send(Posted::Completion {
                        command_id: node.command_id,
                        reply: Reply::Error(format!("submission failed: {}", e)),
                    });
                }
            }
            (engine.fd(), engine.wants_write())
        };

        // Block until the socket or the wakeup pipe is ready.
        let mut events = libc::POLLIN;
        if wants_write {
            events |= libc::POLLOUT;
        }
        let mut fds = [
            libc::pollfd {
                fd,
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: shared.wakeup.read_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!(error = %err, "poll failed");
            break;
        }

        shared.wakeup.drain();

        let writable = fds[0].revents & libc::POLLOUT != 0;
        let readable = fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;

        let mut completions = Vec::new();
        {
            let mut guard = shared.engine.lock().unwrap();
            if let Some(engine) = guard.as_mut() {
                if writable {
                    if let Err(e) = engine.on_write() {
                        debug!(error = %e, "write handler failed");
                    }
                }
                if readable {
                    if let Err(e) = engine.on_read(&mut completions) {
                        debug!(error = %e, "read handler failed");
                    }
                }
            }
        }
        for completion in completions {
            post_completion(completion);
        }
    }

    // Shut the connection down and release the protocol context. Only this
    // thread ever holds the context mutex, so the drop cannot race an I/O
    // handler; anything the host does after the join sees the slot empty.
    if let Some(mut engine) = shared.engine.lock().unwrap().take() {
        engine.disconnect();
    }

    debug!("poll thread exiting");
    let _ = shared.port.send(Posted::Disconnect);
}

/// Post one completion to its destination port. A null reply is posted as
/// `Nil`. A send failure means the receiver is gone (command cancelled or
/// client dropped) and is ignored.
fn post_completion(completion: Completion) {
    let Completion { info, reply } = completion;
    let _ = info.port.send(Posted::Completion {
        command_id: info.command_id,
        reply: reply.unwrap_or(Reply::Nil),
    });
}
