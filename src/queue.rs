//! Lock-free MPSC command intake.
//!
//! Producers are tokio tasks on any thread; the single consumer is the poll
//! thread. Push builds an intrusive LIFO stack under an atomic tail pointer;
//! `drain_all` takes the whole stack in one swap and reverses it, so the
//! consumer observes FIFO order per producer. Each node is observed exactly
//! once.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::event_loop::ReplyPort;

/// An owned command record: destination port, command id, and argv with
/// every argument byte copied at enqueue time. `persistent` marks the
/// subscription commands whose callback outlives a single reply.
pub(crate) struct CommandNode {
    pub port: ReplyPort,
    pub command_id: i64,
    pub args: Vec<Vec<u8>>,
    pub persistent: bool,
}

struct Link {
    node: CommandNode,
    next: *mut Link,
}

/// Unbounded MPSC queue: non-blocking push from any thread, one atomic
/// swap to take everything.
pub(crate) struct CommandQueue {
    tail: AtomicPtr<Link>,
}

// Links are owned Boxes handed off through the atomic tail; the AcqRel swap
// publishes node contents written before the push.
unsafe impl Send for CommandQueue {}
unsafe impl Sync for CommandQueue {}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push a node. Non-blocking, callable from any thread.
    pub fn push(&self, node: CommandNode) {
        let link = Box::into_raw(Box::new(Link {
            node,
            next: ptr::null_mut(),
        }));
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            unsafe { (*link).next = tail };
            match self
                .tail
                .compare_exchange_weak(tail, link, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => tail = current,
            }
        }
    }

    /// Atomically empty the queue, yielding nodes in FIFO-by-producer
    /// order. Consumer-side only. Empty queue yields an empty vec.
    pub fn drain_all(&self) -> Vec<CommandNode> {
        let mut head = self.tail.swap(ptr::null_mut(), Ordering::AcqRel);
        if head.is_null() {
            return Vec::new();
        }
        let mut nodes = Vec::new();
        while !head.is_null() {
            let link = unsafe { Box::from_raw(head) };
            head = link.next;
            nodes.push(link.node);
        }
        // The taken stack is newest-first; reverse to submission order.
        nodes.reverse();
        nodes
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Free any nodes still queued at teardown.
        let _ = self.drain_all();
    }
}
