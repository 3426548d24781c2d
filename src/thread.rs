//! Worker record (spec.md §3 "Worker record") and the per-worker half of
//! the looper state machine (spec.md §4.5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BinderError, Result};
use crate::message::PendingReply;
use crate::pool::ThreadPoolController;
use crate::queue::MessageQueue;

/// A worker's looper state (spec.md §4.5 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperState {
    Fresh,
    Pending,
    Entered,
    Exited,
}

pub struct Worker {
    pub tid: u64,
    pub queue: Arc<MessageQueue>,
    state: Mutex<LooperState>,
    pending_replies: AtomicUsize,
    /// LIFO per invariant I2: the head (front) is the request whose reply
    /// is next expected.
    incoming_transactions: Mutex<VecDeque<PendingReply>>,
    last_error: Mutex<Option<BinderError>>,
}

impl Worker {
    pub fn new(tid: u64, queue: Arc<MessageQueue>) -> Self {
        Self {
            tid,
            queue,
            state: Mutex::new(LooperState::Fresh),
            pending_replies: AtomicUsize::new(0),
            incoming_transactions: Mutex::new(VecDeque::new()),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LooperState {
        *self.state.lock().unwrap()
    }

    pub fn pending_replies(&self) -> usize {
        self.pending_replies.load(Ordering::Acquire)
    }

    pub fn inc_pending_replies(&self) {
        self.pending_replies.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_pending_replies(&self) {
        self.pending_replies.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1))).ok();
    }

    pub fn push_incoming_transaction(&self, pending: PendingReply) {
        self.incoming_transactions.lock().unwrap().push_front(pending);
    }

    /// Pops the request currently being serviced, for `BC_REPLY` routing.
    /// `FailedReply` if nothing is pending (spec.md §4.4 BC_REPLY errors).
    pub fn pop_incoming_transaction(&self) -> Result<PendingReply> {
        self.incoming_transactions.lock().unwrap().pop_front().ok_or(BinderError::FailedReply)
    }

    pub fn set_last_error(&self, err: BinderError) {
        *self.last_error.lock().unwrap() = Some(err);
    }

    pub fn take_last_error(&self) -> Option<BinderError> {
        self.last_error.lock().unwrap().take()
    }

    /// `BC_REGISTER_LOOPER`: rejected if already `Entered`; decrements
    /// `pending_loopers` on success.
    pub fn register_looper(&self, pool: &ThreadPoolController) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == LooperState::Entered {
            self.set_last_error(BinderError::FailedReply);
            return Err(BinderError::FailedReply);
        }
        *state = LooperState::Pending;
        pool.on_register_looper();
        Ok(())
    }

    /// `BC_ENTER_LOOPER`: rejected if already `Entered`; increments
    /// `num_loopers` on success.
    pub fn enter_looper(&self, pool: &ThreadPoolController) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == LooperState::Entered {
            self.set_last_error(BinderError::FailedReply);
            return Err(BinderError::FailedReply);
        }
        *state = LooperState::Entered;
        pool.on_enter_looper();
        Ok(())
    }

    /// `BC_EXIT_LOOPER`: requires `Entered`; decrements `num_loopers` on
    /// success.
    pub fn exit_looper(&self, pool: &ThreadPoolController) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != LooperState::Entered {
            self.set_last_error(BinderError::FailedReply);
            return Err(BinderError::FailedReply);
        }
        *state = LooperState::Exited;
        pool.on_exit_looper();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QueueId;

    fn worker() -> Worker {
        Worker::new(1, Arc::new(MessageQueue::new(QueueId::from_u64(1))))
    }

    #[test]
    fn state_machine_happy_path() {
        let w = worker();
        let pool = ThreadPoolController::new(4);
        w.register_looper(&pool).unwrap();
        assert_eq!(w.state(), LooperState::Pending);
        w.enter_looper(&pool).unwrap();
        assert_eq!(w.state(), LooperState::Entered);
        w.exit_looper(&pool).unwrap();
        assert_eq!(w.state(), LooperState::Exited);
    }

    #[test]
    fn enter_looper_twice_is_rejected() {
        let w = worker();
        let pool = ThreadPoolController::new(4);
        w.enter_looper(&pool).unwrap();
        assert_eq!(w.enter_looper(&pool), Err(BinderError::FailedReply));
        assert_eq!(w.take_last_error(), Some(BinderError::FailedReply));
    }

    #[test]
    fn exit_looper_without_enter_is_rejected() {
        let w = worker();
        let pool = ThreadPoolController::new(4);
        assert_eq!(w.exit_looper(&pool), Err(BinderError::FailedReply));
    }

    #[test]
    fn incoming_transactions_are_lifo() {
        let w = worker();
        w.push_incoming_transaction(PendingReply { reply_queue: QueueId::from_u64(1), sender_pid: 1, sender_euid: 1 });
        w.push_incoming_transaction(PendingReply { reply_queue: QueueId::from_u64(2), sender_pid: 2, sender_euid: 2 });
        let first = w.pop_incoming_transaction().unwrap();
        assert_eq!(first.reply_queue, QueueId::from_u64(2));
    }

    #[test]
    fn pop_incoming_transaction_fails_when_empty() {
        let w = worker();
        assert_eq!(w.pop_incoming_transaction().unwrap_err(), BinderError::FailedReply);
    }
}
