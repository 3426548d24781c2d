//! The payload carried on a `MessageQueue`, and the identifiers it's built
//! from: `QueueId` (an opaque, generation-free handle into `Driver`'s queue
//! table — see spec.md §9 "Raw-pointer object identity") and `ObjectId`
//! (the `(owner_queue, local_key)` pair of spec.md §3).

use crate::protocol::TransactionFlags;

/// Opaque, process-scoped queue identifier. Assigned once per queue by
/// `Driver` and never reused; embedded in wire descriptors in place of a
/// raw pointer, and resolved back to a live `Arc<MessageQueue>` through
/// `Driver`'s queue table (a dead id simply fails to resolve, which callers
/// treat the same way a dead raw pointer would have crashed on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub(crate) u64);

impl QueueId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(v: u64) -> Self {
        QueueId(v)
    }
}

/// The registry key of spec.md §3 "Object identity": `owner_queue` is the
/// queue of the process that exported the object, `local_key` is opaque to
/// everyone except that owner. Lexicographic order on `(owner, local_key)`
/// is exactly the field declaration order here, so `#[derive(Ord)]` gives
/// the total order the registry needs as a `BTreeMap` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub owner: QueueId,
    pub local_key: u64,
}

/// The `data`/`offsets` pair of a transaction, independent of any
/// particular message type. `offsets` are byte offsets into `data` at
/// which a `FlatObject` descriptor (spec.md §6) lives.
#[derive(Debug, Clone, Default)]
pub struct TransactionPayload {
    pub data: Vec<u8>,
    pub offsets: Vec<usize>,
}

impl TransactionPayload {
    pub fn new(data: Vec<u8>, offsets: Vec<usize>) -> Self {
        Self { data, offsets }
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }
}

/// A request still awaiting its reply, recorded on the servicing worker's
/// `incoming_transactions` stack (spec.md §3 invariant I2).
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub reply_queue: QueueId,
    pub sender_pid: u32,
    pub sender_euid: u32,
}

/// Everything that can sit on a `MessageQueue` (spec.md §3, §4.4).
#[derive(Debug, Clone)]
pub enum Message {
    /// A synchronous or one-way call en route to its target's owner queue.
    Transaction {
        code: u32,
        flags: TransactionFlags,
        sender_pid: u32,
        sender_euid: u32,
        payload: TransactionPayload,
        /// `None` exactly when the transaction was sent `ONE_WAY` (spec.md
        /// invariant I4: every non-one-way `Transaction` carries a
        /// `reply_queue`).
        reply_queue: Option<QueueId>,
    },
    /// The answer to a synchronous `Transaction`, en route to its
    /// `reply_queue`.
    Reply {
        sender_pid: u32,
        sender_euid: u32,
        payload: TransactionPayload,
    },
    /// Zero-payload acknowledgement enqueued on the sender's own worker
    /// queue immediately after a `BC_TRANSACTION`/`BC_REPLY` is accepted.
    TransactionComplete,
    /// Delivered to an object's owner queue so the owning worker can append
    /// a notifier to that object's list (spec.md §4.4 BC_REQUEST_DEATH_NOTIFICATION).
    RequestDeathNotification { object: ObjectId, cookie: u64, notify_queue: QueueId },
    /// Delivered to an object's owner queue so the owning worker can remove
    /// a matching notifier (spec.md §4.4 BC_CLEAR_DEATH_NOTIFICATION).
    ClearDeathNotification { object: ObjectId, cookie: u64, notify_queue: QueueId },
    /// A death notification fan-out message, or a synthetic redirect of a
    /// still-queued `Transaction` whose owner was released (spec.md I5).
    DeadBinder { cookie: u64 },
}

impl Message {
    /// Whether this message is a non-one-way `Transaction` — the only kind
    /// that ever lands on a worker's `incoming_transactions` stack.
    pub fn is_synchronous_transaction(&self) -> bool {
        matches!(self, Message::Transaction { reply_queue: Some(_), .. })
    }
}
