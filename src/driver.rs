//! Control surface (spec.md §6): `open`/`release`/`write_read`/
//! `set_max_threads`/`set_context_manager`, plus the global `QueueId`
//! allocation table that backs every opaque owner id `translate.rs` and
//! `router.rs` pass around instead of a raw pointer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use crate::error::{BinderError, Result};
use crate::message::{ObjectId, QueueId};
use crate::process::ProcessRecord;
use crate::queue::MessageQueue;
use crate::router::TransactionRouter;

/// Mirrors the teacher's `DEFAULT_MAX_BINDER_THREADS` constant (spec.md §4.5
/// "a configurable per-process ceiling").
pub const DEFAULT_MAX_THREADS: u32 = 15;

/// Process-wide tunables a host can set at `open` time. Grouped the way the
/// teacher's `Binder::new()` groups its device-open options, generalised
/// beyond a single global device to one `DriverConfig` per `open` call.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub max_threads: u32,
    pub non_blocking: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { max_threads: DEFAULT_MAX_THREADS, non_blocking: false }
    }
}

/// Borrowed read/write buffer pair for one `write_read` call — the safe,
/// slice-based analogue of the teacher's `BinderWriteRead` (which wrapped
/// raw pointers handed to the `ioctl`).
pub struct WriteRead<'a> {
    pub write_buf: &'a [u8],
    pub write_consumed: usize,
    pub read_buf: &'a mut [u8],
    pub read_produced: usize,
}

impl<'a> WriteRead<'a> {
    pub fn new(write_buf: &'a [u8], read_buf: &'a mut [u8]) -> Self {
        Self { write_buf, write_consumed: 0, read_buf, read_produced: 0 }
    }
}

struct ContextManagerBinding {
    object: ObjectId,
    euid: u32,
}

/// The process table plus the queue-id allocator shared by every process it
/// hosts. One `Driver` stands in for the real `/dev/binder` character
/// device: `open` is a process attaching, `release` is it detaching, and
/// `write_read` is the one multiplexed syscall real Binder clients make.
pub struct Driver {
    processes: Mutex<HashMap<u32, Arc<ProcessRecord>>>,
    queues: Mutex<HashMap<QueueId, Weak<MessageQueue>>>,
    next_queue_id: AtomicU64,
    next_tid: AtomicU32,
    context_manager: Mutex<Option<ContextManagerBinding>>,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            // 0 is reserved as the wire sentinel for "no target" / "no
            // context manager" (router.rs), so real ids start at 1.
            next_queue_id: AtomicU64::new(1),
            next_tid: AtomicU32::new(1),
            context_manager: Mutex::new(None),
        }
    }

    /// Allocates a fresh, table-registered queue. Ids are never reused
    /// (spec.md §9 "Raw-pointer object identity": a stale id must simply
    /// fail to resolve, the same way a dangling pointer used to fault,
    /// rather than silently aliasing onto a newer queue).
    fn new_queue(&self) -> Arc<MessageQueue> {
        let id = QueueId::from_u64(self.next_queue_id.fetch_add(1, Ordering::AcqRel));
        let queue = Arc::new(MessageQueue::new(id));
        self.queues.lock().unwrap().insert(id, Arc::downgrade(&queue));
        queue
    }

    /// Resolves an opaque `QueueId` back to a live queue, or `None` if that
    /// process has since released. Used by `translate.rs`'s callers and by
    /// `router.rs` to turn a `Message`'s embedded `QueueId`s into something
    /// it can actually push onto.
    pub fn resolve_queue(&self, id: QueueId) -> Option<Arc<MessageQueue>> {
        self.queues.lock().unwrap().get(&id)?.upgrade()
    }

    /// `open(pid, euid, config)` (spec.md §6): registers a new process
    /// record with its own process-wide queue, and installs the drain-side
    /// dead-binder sink so `ProcessRecord::release`'s fan-out can resolve a
    /// notify target's `QueueId` without depending on `Driver` directly.
    pub fn open(self: &Arc<Self>, pid: u32, euid: u32, config: DriverConfig) -> Arc<ProcessRecord> {
        let queue = self.new_queue();
        let process = Arc::new(ProcessRecord::new(pid, euid, queue.clone(), config.max_threads, config.non_blocking));

        let driver = self.clone();
        process.set_dead_binder_sink(Box::new(move |notify_queue, cookie| {
            if let Some(target) = driver.resolve_queue(notify_queue) {
                target.push_tail(crate::message::Message::DeadBinder { cookie });
            }
        }));

        let driver = self.clone();
        let pid_for_redirect = pid;
        queue.set_drain_cb(move |msg| {
            if let crate::message::Message::Transaction { reply_queue: Some(reply_queue), .. } = msg {
                if let Some(target) = driver.resolve_queue(reply_queue) {
                    debug!("redirecting in-flight transaction to released pid={} as DeadBinder", pid_for_redirect);
                    target.push_tail(crate::message::Message::DeadBinder { cookie: 0 });
                }
            }
        });

        self.processes.lock().unwrap().insert(pid, process.clone());
        info!("opened process pid={} euid={} queue={:?}", pid, euid, process.id());
        process
    }

    /// Allocates a fresh OS-thread id scoped to this driver, for hosts that
    /// don't already have one of their own (the demos use this; a real
    /// integration would pass its actual thread id instead).
    pub fn next_tid(&self) -> u64 {
        self.next_tid.fetch_add(1, Ordering::AcqRel) as u64
    }

    /// Looks up (or lazily creates) the `Worker` for `tid` on `process`,
    /// allocating its private queue through this driver's own table so the
    /// resulting `QueueId` is resolvable the same way every other queue is.
    pub fn worker(&self, process: &Arc<ProcessRecord>, tid: u64) -> Arc<crate::thread::Worker> {
        process.worker_for(tid, || self.new_queue())
    }

    /// `release(pid)` (spec.md §6): reclaims a process exactly once.
    pub fn release(&self, pid: u32) {
        let process = self.processes.lock().unwrap().remove(&pid);
        if let Some(process) = process {
            process.release();
            let mut cm = self.context_manager.lock().unwrap();
            if cm.as_ref().map(|b| b.object.owner) == Some(process.id()) {
                *cm = None;
            }
            info!("released process pid={}", pid);
        } else {
            warn!("release of unknown pid={}", pid);
        }
    }

    /// `set_max_threads(process, n)` (spec.md §6).
    pub fn set_max_threads(&self, process: &ProcessRecord, n: u32) {
        process.pool.set_max_threads(n);
    }

    /// `set_context_manager(process, object)` (spec.md §6 "Control
    /// surface"): only the first caller binds it; a later call from a
    /// different euid is rejected, and a later call from the same euid is
    /// treated as a rebind attempt and rejected too (DESIGN.md Open
    /// Question 4 — spec.md reads literally as "only the first caller
    /// binds").
    pub fn set_context_manager(&self, process: &ProcessRecord, local_key: u64) -> Result<()> {
        let object = process.registry.find_local(local_key).ok_or(BinderError::FailedReply)?;
        let mut cm = self.context_manager.lock().unwrap();
        match cm.as_ref() {
            None => {
                *cm = Some(ContextManagerBinding { object: object.id, euid: process.euid });
                info!("context manager bound by pid={}", process.pid);
                Ok(())
            }
            Some(existing) if existing.euid == process.euid => Err(BinderError::Busy),
            Some(_) => Err(BinderError::PermissionDenied),
        }
    }

    /// The `ObjectId` of the currently bound context manager, if any —
    /// what `BC_TRANSACTION`'s context-manager sentinel target resolves to.
    pub fn context_manager(&self) -> Option<ObjectId> {
        self.context_manager.lock().unwrap().as_ref().map(|b| b.object)
    }

    /// Version probe (spec.md §6): the teacher's `Binder::new()` reads the
    /// kernel driver's protocol version at open time and rejects a
    /// mismatch; this dispatcher has no second implementation to drift
    /// from, so the probe is a fixed constant a host can compare against.
    pub fn protocol_version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    /// `write_read` (spec.md §6): runs `write_commands` then, if it didn't
    /// abort the batch, `read_commands`, against the given process/thread.
    pub fn write_read(&self, process: &Arc<ProcessRecord>, thread: &Arc<crate::thread::Worker>, io: &mut WriteRead) -> Result<()> {
        let driver_queues = self.resolver();
        io.write_consumed = TransactionRouter::write_commands(process, thread, io.write_buf, self.context_manager(), &driver_queues)?;
        io.read_produced = TransactionRouter::read_commands(process, thread, io.read_buf)?;
        Ok(())
    }

    fn resolver(&self) -> impl Fn(QueueId) -> Option<Arc<MessageQueue>> + '_ {
        move |id| self.resolve_queue(id)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

/// Bumped only if the wire framing in `router.rs` changes shape.
const PROTOCOL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_assigns_distinct_queue_ids() {
        let driver = Arc::new(Driver::new());
        let a = driver.open(1, 0, DriverConfig::default());
        let b = driver.open(2, 0, DriverConfig::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn resolve_queue_fails_once_the_last_reference_is_gone() {
        // `Driver` only tracks a `Weak`; a process's queue stays resolvable
        // for as long as *something* holds the matching `Arc` (here, the
        // `process` binding itself), same as the teacher's reference
        // counting discipline elsewhere in the crate. It's `release` *and*
        // dropping the last handle together that makes an id go dead.
        let driver = Arc::new(Driver::new());
        let process = driver.open(1, 0, DriverConfig::default());
        let id = process.id();
        assert!(driver.resolve_queue(id).is_some());
        driver.release(1);
        drop(process);
        assert!(driver.resolve_queue(id).is_none());
    }

    #[test]
    fn context_manager_binds_once() {
        let driver = Arc::new(Driver::new());
        let process = driver.open(1, 0, DriverConfig::default());
        process.registry.insert_or_get(process.id(), 1);
        driver.set_context_manager(&process, 1).unwrap();
        assert!(driver.context_manager().is_some());
    }

    #[test]
    fn context_manager_rebind_same_euid_is_busy() {
        let driver = Arc::new(Driver::new());
        let process = driver.open(1, 7, DriverConfig::default());
        process.registry.insert_or_get(process.id(), 1);
        driver.set_context_manager(&process, 1).unwrap();
        assert_eq!(driver.set_context_manager(&process, 1), Err(BinderError::Busy));
    }

    #[test]
    fn context_manager_rebind_other_euid_is_permission_denied() {
        let driver = Arc::new(Driver::new());
        let a = driver.open(1, 7, DriverConfig::default());
        a.registry.insert_or_get(a.id(), 1);
        driver.set_context_manager(&a, 1).unwrap();

        let b = driver.open(2, 8, DriverConfig::default());
        b.registry.insert_or_get(b.id(), 2);
        assert_eq!(driver.set_context_manager(&b, 2), Err(BinderError::PermissionDenied));
    }

    #[test]
    fn release_clears_context_manager_bound_by_that_process() {
        let driver = Arc::new(Driver::new());
        let process = driver.open(1, 0, DriverConfig::default());
        process.registry.insert_or_get(process.id(), 1);
        driver.set_context_manager(&process, 1).unwrap();
        driver.release(1);
        assert!(driver.context_manager().is_none());
    }

    #[test]
    fn release_redirects_in_flight_transaction_to_dead_binder() {
        let driver = Arc::new(Driver::new());
        let sender = driver.open(1, 0, DriverConfig::default());
        let sender_thread = sender.worker_for(driver.next_tid(), || driver.new_queue());
        let target = driver.open(2, 0, DriverConfig::default());
        let object = target.registry.insert_or_get(target.id(), 1);

        let mut write_buf = Vec::new();
        write_buf.extend_from_slice(&0u32.to_le_bytes()); // BC_TRANSACTION
        write_buf.extend_from_slice(&object.id.owner.as_u64().to_le_bytes());
        write_buf.extend_from_slice(&object.id.local_key.to_le_bytes());
        write_buf.extend_from_slice(&1u32.to_le_bytes()); // code
        write_buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        write_buf.extend_from_slice(&0u64.to_le_bytes()); // data_size
        write_buf.extend_from_slice(&0u64.to_le_bytes()); // offsets_count

        let resolver = driver.resolver();
        TransactionRouter::write_commands(&sender, &sender_thread, &write_buf, None, &resolver).unwrap();
        assert_eq!(target.queue.size(), 1);

        driver.release(2);
        assert_eq!(sender_thread.queue.size(), 2); // TransactionComplete + redirected DeadBinder
    }
}
