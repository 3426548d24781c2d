//! Process record (spec.md §3) and the owner-release fan-out (spec.md
//! §4.4 "Owner-release fan-out", invariant I5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::message::QueueId;
use crate::pool::ThreadPoolController;
use crate::queue::MessageQueue;
use crate::registry::ObjectRegistry;
use crate::thread::Worker;

/// Delivers a `DeadBinder` for `cookie` to the live queue behind
/// `QueueId`, if any. Wired up by `Driver` (which owns the queue table
/// needed to resolve a `QueueId` back to a live queue) so `ProcessRecord`
/// doesn't need to depend on `Driver` directly — that dependency would be
/// circular, since `Driver` owns the process table.
pub type DeadBinderSink = Box<dyn Fn(QueueId, u64) + Send + Sync>;

pub struct ProcessRecord {
    pub pid: u32,
    pub euid: u32,
    pub queue: Arc<MessageQueue>,
    pub registry: ObjectRegistry,
    pub pool: ThreadPoolController,
    pub non_blocking: bool,
    workers: Mutex<HashMap<u64, Arc<Worker>>>,
    dead_binder_sink: Mutex<Option<DeadBinderSink>>,
}

impl ProcessRecord {
    pub fn new(pid: u32, euid: u32, queue: Arc<MessageQueue>, max_threads: u32, non_blocking: bool) -> Self {
        let self_queue = queue.id();
        Self {
            pid,
            euid,
            queue,
            registry: ObjectRegistry::new(self_queue),
            pool: ThreadPoolController::new(max_threads),
            non_blocking,
            workers: Mutex::new(HashMap::new()),
            dead_binder_sink: Mutex::new(None),
        }
    }

    pub fn set_dead_binder_sink(&self, sink: DeadBinderSink) {
        *self.dead_binder_sink.lock().unwrap() = Some(sink);
    }

    pub fn id(&self) -> QueueId {
        self.queue.id()
    }

    /// Worker records are created lazily on first use by a given OS thread
    /// (spec.md §3 "Lifecycle"). `make_queue` supplies a fresh, already
    /// `Driver`-registered queue for a brand-new worker.
    pub fn worker_for(&self, tid: u64, make_queue: impl FnOnce() -> Arc<MessageQueue>) -> Arc<Worker> {
        let mut workers = self.workers.lock().unwrap();
        workers.entry(tid).or_insert_with(|| Arc::new(Worker::new(tid, make_queue()))).clone()
    }

    pub fn remove_worker(&self, tid: u64) -> Option<Arc<Worker>> {
        self.workers.lock().unwrap().remove(&tid)
    }

    fn all_worker_queues(&self) -> Vec<Arc<MessageQueue>> {
        self.workers.lock().unwrap().values().map(|w| w.queue.clone()).collect()
    }

    /// Reclaims a process on release: every object it owns fans its death
    /// out to observers (spec.md invariant I5), then every queue (the
    /// process-wide queue and each worker's private queue) is closed. The
    /// process-wide queue's drain callback was installed at creation time
    /// (see `Driver::open`) to redirect any still-queued `Transaction` to a
    /// synthetic `DeadBinder` at its own `reply_queue`, so blocked senders
    /// unblock with a failure instead of hanging.
    pub fn release(&self) {
        debug!("releasing process pid={} queue={:?}", self.pid, self.id());

        for object in self.registry.owned_objects() {
            for (cookie, notify_queue) in object.drain_notifiers() {
                // The design note in spec.md §9 ("Drain-on-close race")
                // asks that we acquire the notify queue before the owner's
                // own queue gives up its reference; `Driver` resolves
                // `notify_queue` to a live `Arc<MessageQueue>` (or silently
                // drops the notification if that process is already gone
                // too), so there is no lock held across this push.
                self.deliver_dead_binder(notify_queue, cookie);
            }
        }

        for worker_queue in self.all_worker_queues() {
            worker_queue.close();
        }
        self.queue.close();
    }

    /// Default no-op until `set_dead_binder_sink` is called (by `Driver`,
    /// at process creation time).
    fn deliver_dead_binder(&self, notify_queue: QueueId, cookie: u64) {
        if let Some(sink) = self.dead_binder_sink.lock().unwrap().as_ref() {
            sink(notify_queue, cookie);
        }
    }
}
