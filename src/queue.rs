//! Message Queue (spec.md §4.1): a typed FIFO with blocking `pop`,
//! head-push, size query, an external refcount, and a drain callback run
//! over residual messages when the queue closes.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{BinderError, Result};
use crate::message::{Message, QueueId};

/// The outcome of a `pop`: spec.md's "msg | empty | closed".
#[derive(Debug)]
pub enum Pop {
    Message(Message),
    Empty,
    Closed,
}

type DrainCallback = Box<dyn FnMut(Message) + Send>;

struct State {
    messages: VecDeque<Message>,
    closed: bool,
    /// Logical refcount distinct from `Arc`'s strong count — see DESIGN.md
    /// "queue.rs" open question. Tracks the spec's acquire/release contract
    /// (an `acquire` after `close` must fail) independently of Rust's own
    /// memory-safety guarantees.
    refcount: usize,
    drain_cb: Option<DrainCallback>,
}

pub struct MessageQueue {
    id: QueueId,
    state: Mutex<State>,
    not_empty: Condvar,
}

impl MessageQueue {
    pub(crate) fn new(id: QueueId) -> Self {
        Self {
            id,
            state: Mutex::new(State {
                messages: VecDeque::new(),
                closed: false,
                refcount: 1,
                drain_cb: None,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Install the callback invoked, in FIFO order, on every message still
    /// queued when `close` runs.
    pub fn set_drain_cb(&self, cb: impl FnMut(Message) + Send + 'static) {
        self.state.lock().unwrap().drain_cb = Some(Box::new(cb));
    }

    pub fn push_tail(&self, msg: Message) {
        let mut state = self.state.lock().unwrap();
        state.messages.push_back(msg);
        // Holding `state`'s lock across push and notify is what gives the
        // ordering guarantee in spec.md §5: a concurrent `push_head` that
        // takes the same lock strictly before or after this one is never
        // interleaved with it.
        self.not_empty.notify_one();
    }

    pub fn push_head(&self, msg: Message) {
        let mut state = self.state.lock().unwrap();
        state.messages.push_front(msg);
        self.not_empty.notify_one();
    }

    /// `blocking = false` always returns immediately with `Empty` rather
    /// than waiting; this is how a process's non-blocking flag (spec.md §5)
    /// reaches the queue layer.
    pub fn pop(&self, blocking: bool) -> Pop {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(msg) = state.messages.pop_front() {
                return Pop::Message(msg);
            }
            if state.closed {
                return Pop::Closed;
            }
            if !blocking {
                return Pop::Empty;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BinderError::DeadReply);
        }
        state.refcount += 1;
        Ok(())
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.refcount = state.refcount.saturating_sub(1);
    }

    /// Marks the queue closed, wakes every blocked `pop`, and runs the
    /// drain callback over whatever was still queued — exactly once, in
    /// FIFO order. Idempotent: a second `close` finds nothing left to
    /// drain.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut drained = std::mem::take(&mut state.messages);
        let mut drain_cb = state.drain_cb.take();
        drop(state);
        self.not_empty.notify_all();

        if let Some(cb) = drain_cb.as_mut() {
            for msg in drained.drain(..) {
                cb(msg);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
