//! Transaction Router (spec.md §4.4): `write_commands`/`read_commands`,
//! the write/read command-stream protocol that is the dispatcher's entire
//! public surface over a process/thread pair.

use std::convert::{TryFrom, TryInto};

use log::{debug, trace, warn};

use crate::error::{BinderError, Result};
use crate::message::{Message, ObjectId, PendingReply, QueueId, TransactionPayload};
use crate::process::ProcessRecord;
use crate::protocol::{self, BinderCommand, BinderReturn, TransactionFlags};
use crate::queue::Pop;
use crate::thread::Worker;
use crate::translate;

/// Cursor reader over a borrowed write-command buffer. Deliberately hand
/// rolled rather than built on `byteorder`'s `std::io::Cursor` (as
/// `parcel.rs`'s payload-level `Parcel` is): every read here must map a
/// truncated buffer to `BinderError::Fault` rather than an `io::Error`, and
/// must never panic on out-of-range input from the host.
struct CommandReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CommandReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(BinderError::Fault)?;
        let slice = self.buf.get(self.pos..end).ok_or(BinderError::Fault)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reading the opcode itself is framing, not payload: an opcode that
    /// doesn't fit or doesn't name a known command is `InvalidArgument`,
    /// matching spec.md §4.4 ("Parsing stops on a malformed opcode").
    fn read_opcode(&mut self) -> Result<BinderCommand> {
        let end = self.pos.checked_add(4).ok_or(BinderError::InvalidArgument)?;
        let raw_bytes = self.buf.get(self.pos..end).ok_or(BinderError::InvalidArgument)?;
        let raw = u32::from_le_bytes(raw_bytes.try_into().unwrap());
        self.pos = end;
        BinderCommand::try_from(raw).map_err(|_| BinderError::InvalidArgument)
    }
}

struct RawTransactionData {
    /// `None` only ever appears for `BC_REPLY` (no target field at all) or
    /// for a `BC_TRANSACTION` whose wire owner field was the context-manager
    /// sentinel (`owner == 0`, never a live `QueueId` — see `driver.rs`).
    target: Option<ObjectId>,
    code: u32,
    flags: TransactionFlags,
    payload: TransactionPayload,
}

/// A handle is carried on the wire as a full `(owner_queue, local_key)`
/// pair rather than a bare integer: the sender's registry indexes
/// references by that compound key (`registry.rs`), and a reference it
/// holds is, in general, owned by some *other* process, so a flat
/// `local_key` alone can't be resolved back through `find_local`.
fn read_transaction_data(reader: &mut CommandReader, with_target: bool) -> Result<RawTransactionData> {
    let target = if with_target {
        let owner_raw = reader.read_u64()?;
        let local_key = reader.read_u64()?;
        if owner_raw == 0 {
            None
        } else {
            Some(ObjectId { owner: QueueId::from_u64(owner_raw), local_key })
        }
    } else {
        None
    };
    let code = reader.read_u32()?;
    let flags = TransactionFlags::from_bits_truncate(reader.read_u32()?);
    let data_size = reader.read_u64()? as usize;
    let offsets_count = reader.read_u64()? as usize;
    let data = reader.take(data_size)?.to_vec();
    let mut offsets = Vec::with_capacity(offsets_count);
    for _ in 0..offsets_count {
        offsets.push(reader.read_u64()? as usize);
    }
    Ok(RawTransactionData { target, code, flags, payload: TransactionPayload::new(data, offsets) })
}

/// Cursor writer over a borrowed read-command buffer. Every write-family
/// call that would overflow the buffer leaves `self` untouched and returns
/// `false`/`Err(NoSpace)` so the caller can re-queue the whole message at
/// the originating queue's head rather than emit a half-written record
/// (spec.md §4.4 "Buffer exhaustion").
struct CommandWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> CommandWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn write_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    fn write_opcode(&mut self, op: BinderReturn) {
        self.write_u32(op.into());
    }

    fn write_payload(&mut self, payload: &TransactionPayload) {
        self.write_u64(payload.data.len() as u64);
        self.write_u64(payload.offsets.len() as u64);
        self.put(&payload.data);
        for &off in &payload.offsets {
            self.write_u64(off as u64);
        }
    }
}

/// Exact byte length `CommandWriter` would need to serialise `msg` — used
/// to decide, before writing anything, whether the message fits in the
/// remaining buffer (spec.md §4.4 "Buffer exhaustion").
fn serialized_len(msg: &Message) -> usize {
    const OPCODE: usize = 4;
    match msg {
        Message::Transaction { payload, .. } => OPCODE + 4 + 4 + 4 + 4 + 8 + 8 + payload.data.len() + payload.offsets.len() * 8,
        Message::Reply { payload, .. } => OPCODE + 4 + 4 + 8 + 8 + payload.data.len() + payload.offsets.len() * 8,
        Message::TransactionComplete => OPCODE,
        Message::RequestDeathNotification { .. } | Message::ClearDeathNotification { .. } => 0,
        Message::DeadBinder { .. } => OPCODE + 8,
    }
}

/// Allocates and validates a transaction's payload size (spec.md §4.4:
/// "Allocate a message sized `align(data_size) + align(offsets_size)`").
/// We don't model a slab allocator (explicitly out of scope, spec.md §1);
/// the "allocation" is just the size check that a real allocator would
/// have performed, returning `FailedReply` on overflow exactly as spec.md
/// §4.4 prescribes ("if allocation fails, surface FAILED_REPLY").
fn validate_allocation(payload: &TransactionPayload) -> Result<()> {
    let offsets_bytes = protocol::align4(payload.offsets.len() * 8);
    let data_bytes = protocol::align4(payload.data.len());
    protocol::validate_transaction_size(payload.data.len(), &payload.offsets).map_err(|_| BinderError::FailedReply)?;
    // `align`ed sizes are only used for the size-budget check itself;
    // there's no separate allocator object to hand them to.
    let _ = (offsets_bytes, data_bytes);
    Ok(())
}

pub struct TransactionRouter;

impl TransactionRouter {
    /// Resolves the target object for a `BC_TRANSACTION`: a `None` target
    /// (the wire's context-manager sentinel) resolves to the bound context
    /// manager, if any (spec.md §6 "Control surface"); otherwise the target
    /// must already be a handle the sender's registry recognises — either
    /// an object it owns or a reference it was previously handed.
    fn resolve_target(
        process: &ProcessRecord,
        target: Option<ObjectId>,
        context_manager: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let target = match target {
            None => return context_manager.ok_or(BinderError::DeadReply),
            Some(t) => t,
        };
        process
            .registry
            .find(target.owner, target.local_key)
            .map(|obj| obj.id)
            .ok_or(BinderError::DeadReply)
    }

    /// `BC_TRANSACTION` (spec.md §4.4). `resolve_queue` turns a `QueueId`
    /// into a live `Arc<MessageQueue>`, or `None` if that process is gone
    /// (`Driver`'s queue table).
    #[allow(clippy::too_many_arguments)]
    fn handle_transaction(
        process: &ProcessRecord,
        thread: &Worker,
        raw: RawTransactionData,
        context_manager: Option<ObjectId>,
        resolve_queue: &dyn Fn(QueueId) -> Option<std::sync::Arc<crate::queue::MessageQueue>>,
    ) {
        let result = (|| -> Result<()> {
            let target = Self::resolve_target(process, raw.target, context_manager)?;
            let mut payload = raw.payload;
            validate_allocation(&payload)?;
            translate::translate_write_side(&mut payload, &process.registry, process.id())?;

            let one_way = raw.flags.contains(TransactionFlags::ONE_WAY);
            let target_queue = resolve_queue(target.owner).ok_or(BinderError::DeadReply)?;

            let msg = Message::Transaction {
                code: raw.code,
                flags: raw.flags,
                sender_pid: process.pid,
                sender_euid: process.euid,
                payload,
                reply_queue: if one_way { None } else { Some(thread.queue.id()) },
            };
            target_queue.push_tail(msg);
            if !one_way {
                thread.inc_pending_replies();
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                trace!("BC_TRANSACTION accepted from pid={}", process.pid);
                thread.queue.push_tail(Message::TransactionComplete);
            }
            Err(e) => {
                warn!("BC_TRANSACTION failed: {:?}", e);
                thread.set_last_error(e);
            }
        }
    }

    /// `BC_REPLY` (spec.md §4.4).
    fn handle_reply(
        process: &ProcessRecord,
        thread: &Worker,
        raw: RawTransactionData,
        resolve_queue: &dyn Fn(QueueId) -> Option<std::sync::Arc<crate::queue::MessageQueue>>,
    ) {
        let result = (|| -> Result<PendingReply> {
            let pending = thread.pop_incoming_transaction()?;
            let mut payload = raw.payload;
            validate_allocation(&payload)?;
            translate::translate_write_side(&mut payload, &process.registry, process.id())?;

            let reply_queue = resolve_queue(pending.reply_queue).ok_or(BinderError::DeadReply)?;
            reply_queue.push_tail(Message::Reply {
                sender_pid: process.pid,
                sender_euid: process.euid,
                payload,
            });
            Ok(pending)
        })();

        match result {
            Ok(_) => {
                thread.queue.push_tail(Message::TransactionComplete);
            }
            Err(e) => {
                warn!("BC_REPLY failed: {:?}", e);
                thread.set_last_error(e);
            }
        }
    }

    /// `BC_REQUEST_DEATH_NOTIFICATION`/`BC_CLEAR_DEATH_NOTIFICATION`
    /// (spec.md §4.4): `object` must already be a handle the caller's
    /// registry recognises (its own object or a held reference), then the
    /// request is forwarded to the object's owner queue for processing
    /// there.
    fn handle_death_notification_request(
        process: &ProcessRecord,
        thread: &Worker,
        object: ObjectId,
        cookie: u64,
        clear: bool,
        resolve_queue: &dyn Fn(QueueId) -> Option<std::sync::Arc<crate::queue::MessageQueue>>,
    ) {
        let result = (|| -> Result<()> {
            let object = process.registry.find(object.owner, object.local_key).ok_or(BinderError::FailedReply)?;
            let owner_queue = resolve_queue(object.id.owner).ok_or(BinderError::DeadReply)?;
            let msg = if clear {
                Message::ClearDeathNotification { object: object.id, cookie, notify_queue: process.id() }
            } else {
                Message::RequestDeathNotification { object: object.id, cookie, notify_queue: process.id() }
            };
            owner_queue.push_tail(msg);
            Ok(())
        })();
        if let Err(e) = result {
            warn!("death notification request failed: {:?}", e);
            thread.set_last_error(e);
        }
    }

    /// `write_commands(thread, buf) -> bytes_consumed` (spec.md §4.4).
    /// Returns `Err` only for framing failures that abort the whole batch
    /// (spec.md §7); per-command failures are recorded on `thread` and the
    /// loop continues.
    pub fn write_commands(
        process: &ProcessRecord,
        thread: &Worker,
        buf: &[u8],
        context_manager: Option<ObjectId>,
        resolve_queue: &dyn Fn(QueueId) -> Option<std::sync::Arc<crate::queue::MessageQueue>>,
    ) -> Result<usize> {
        let mut reader = CommandReader::new(buf);
        while !reader.is_empty() {
            let opcode = reader.read_opcode()?;
            match opcode {
                BinderCommand::Transaction => {
                    let raw = read_transaction_data(&mut reader, true)?;
                    Self::handle_transaction(process, thread, raw, context_manager, resolve_queue);
                }
                BinderCommand::Reply => {
                    let raw = read_transaction_data(&mut reader, false)?;
                    Self::handle_reply(process, thread, raw, resolve_queue);
                }
                BinderCommand::RequestDeathNotification => {
                    let owner = QueueId::from_u64(reader.read_u64()?);
                    let local_key = reader.read_u64()?;
                    let cookie = reader.read_u64()?;
                    Self::handle_death_notification_request(
                        process,
                        thread,
                        ObjectId { owner, local_key },
                        cookie,
                        false,
                        resolve_queue,
                    );
                }
                BinderCommand::ClearDeathNotification => {
                    let owner = QueueId::from_u64(reader.read_u64()?);
                    let local_key = reader.read_u64()?;
                    let cookie = reader.read_u64()?;
                    Self::handle_death_notification_request(
                        process,
                        thread,
                        ObjectId { owner, local_key },
                        cookie,
                        true,
                        resolve_queue,
                    );
                }
                BinderCommand::RegisterLooper => {
                    thread.register_looper(&process.pool).ok();
                }
                BinderCommand::EnterLooper => {
                    thread.enter_looper(&process.pool).ok();
                }
                BinderCommand::ExitLooper => {
                    thread.exit_looper(&process.pool).ok();
                }
            }
        }
        Ok(reader.position())
    }

    /// `read_commands(thread, buf) -> bytes_produced` (spec.md §4.4).
    pub fn read_commands(process: &ProcessRecord, thread: &Worker, buf: &mut [u8]) -> Result<usize> {
        let mut writer = CommandWriter::new(buf);

        if process.queue.size() > 1 && process.pool.try_reserve_spawn(process.queue.size()) {
            if writer.remaining() >= 4 {
                writer.write_opcode(BinderReturn::SpawnLooper);
                debug!("emitted BR_SPAWN_LOOPER for pid={}", process.pid);
            } else {
                // Couldn't even fit the spawn hint; give the reservation
                // back so it isn't silently lost.
                process.pool.on_register_looper();
                return Ok(writer.position());
            }
        }

        if let Some(err) = thread.take_last_error() {
            // A per-command handler must only ever stash `FailedReply`/
            // `DeadReply` here (spec.md §7); a fatal-to-batch kind leaking
            // through would otherwise vanish with no signal to the caller
            // (see `BinderError::is_fatal_to_batch`), so surface it by
            // aborting the read batch rather than silently dropping it.
            if err.is_fatal_to_batch() {
                return Err(err);
            }
            let op = match err {
                BinderError::FailedReply => Some(BinderReturn::FailedReply),
                BinderError::DeadReply => Some(BinderReturn::DeadReply),
                _ => None,
            };
            if let Some(op) = op {
                if writer.remaining() >= 4 {
                    writer.write_opcode(op);
                } else {
                    thread.set_last_error(err);
                    return Ok(writer.position());
                }
            }
        }

        let mut first_iteration = true;
        loop {
            let prefer_private = thread.queue.size() > 0 || thread.pending_replies() > 0;
            // `prefer_private` only decides *which* queue to pop; whether
            // the pop may block is governed solely by the host's
            // non-blocking flag (spec.md §5: "for non-blocking processes it
            // returns immediately" with no carve-out for a non-empty private
            // queue). Only the very first dequeue in a call may block at
            // all; later iterations just drain whatever is immediately
            // available so the call returns promptly with a partial batch.
            let blocking = first_iteration && !process.non_blocking;
            first_iteration = false;

            let popped = if prefer_private {
                thread.queue.pop(blocking)
            } else {
                process.queue.pop(blocking)
            };

            let msg = match popped {
                Pop::Message(m) => m,
                Pop::Empty | Pop::Closed => break,
            };

            if serialized_len(&msg) > writer.remaining() {
                if prefer_private {
                    thread.queue.push_head(msg);
                } else {
                    process.queue.push_head(msg);
                }
                break;
            }

            Self::dispatch(process, thread, msg, &mut writer);
        }

        Ok(writer.position())
    }

    fn dispatch(process: &ProcessRecord, thread: &Worker, msg: Message, writer: &mut CommandWriter) {
        match msg {
            Message::Transaction { code, flags, sender_pid, sender_euid, mut payload, reply_queue } => {
                if translate::translate_read_side(&mut payload, &process.registry, process.id()).is_err() {
                    warn!("dropping transaction with malformed embedded descriptor");
                    return;
                }
                writer.write_opcode(BinderReturn::Transaction);
                writer.write_u32(sender_pid);
                writer.write_u32(sender_euid);
                writer.write_u32(code);
                writer.write_u32(flags.bits());
                writer.write_payload(&payload);
                if let Some(reply_queue) = reply_queue {
                    thread.push_incoming_transaction(PendingReply { reply_queue, sender_pid, sender_euid });
                }
            }
            Message::Reply { sender_pid, sender_euid, mut payload } => {
                if translate::translate_read_side(&mut payload, &process.registry, process.id()).is_err() {
                    warn!("dropping reply with malformed embedded descriptor");
                    thread.dec_pending_replies();
                    return;
                }
                writer.write_opcode(BinderReturn::Reply);
                writer.write_u32(sender_pid);
                writer.write_u32(sender_euid);
                writer.write_payload(&payload);
                thread.dec_pending_replies();
            }
            Message::TransactionComplete => {
                writer.write_opcode(BinderReturn::TransactionComplete);
            }
            Message::RequestDeathNotification { object, cookie, notify_queue } => {
                if let Some(obj) = process.registry.find(object.owner, object.local_key) {
                    obj.add_notifier(cookie, notify_queue);
                }
                // Nothing delivered to the user buffer (spec.md §4.4).
            }
            Message::ClearDeathNotification { object, cookie, notify_queue } => {
                let removed = process
                    .registry
                    .find(object.owner, object.local_key)
                    .map(|obj| obj.remove_notifier(cookie, notify_queue))
                    .unwrap_or(false);
                if removed {
                    writer.write_opcode(BinderReturn::ClearDeathNotificationDone);
                    writer.write_u64(cookie);
                }
            }
            Message::DeadBinder { cookie } => {
                writer.write_opcode(BinderReturn::DeadBinder);
                writer.write_u64(cookie);
                if thread.pending_replies() > 0 {
                    thread.dec_pending_replies();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MessageQueue;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct TestBus {
        queues: Mutex<HashMap<QueueId, Arc<MessageQueue>>>,
        next_id: Mutex<u64>,
    }

    impl TestBus {
        fn new() -> Self {
            Self { queues: Mutex::new(HashMap::new()), next_id: Mutex::new(1) }
        }

        fn new_queue(&self) -> Arc<MessageQueue> {
            let mut next = self.next_id.lock().unwrap();
            let id = QueueId::from_u64(*next);
            *next += 1;
            let queue = Arc::new(MessageQueue::new(id));
            self.queues.lock().unwrap().insert(id, queue.clone());
            queue
        }

        fn resolver(self: &Arc<Self>) -> impl Fn(QueueId) -> Option<Arc<MessageQueue>> {
            let bus = self.clone();
            move |id| bus.queues.lock().unwrap().get(&id).cloned()
        }
    }

    /// `owner_raw == 0` encodes the context-manager sentinel target.
    fn encode_transaction(
        with_target: bool,
        owner_raw: u64,
        local_key: u64,
        code: u32,
        flags: u32,
        data: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        if with_target {
            buf.extend_from_slice(&owner_raw.to_le_bytes());
            buf.extend_from_slice(&local_key.to_le_bytes());
        }
        buf.extend_from_slice(&code.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // offsets_count
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn ping_pong_round_trip() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();

        let a_proc = ProcessRecord::new(100, 0, bus.new_queue(), 4, false);
        let b_proc = ProcessRecord::new(200, 0, bus.new_queue(), 4, false);
        let b_object = b_proc.registry.insert_or_get(b_proc.id(), 1);
        let context_manager = Some(b_object.id);

        let a_thread = a_proc.worker_for(1, || bus.new_queue());

        let mut write_buf = Vec::new();
        write_buf.extend_from_slice(&0u32.to_le_bytes()); // BC_TRANSACTION
        write_buf.extend_from_slice(&encode_transaction(true, 0, 0, 1, 0, b"ping"));
        let consumed = TransactionRouter::write_commands(&a_proc, &a_thread, &write_buf, context_manager, &resolver).unwrap();
        assert_eq!(consumed, write_buf.len());

        let b_thread = b_proc.worker_for(1, || bus.new_queue());
        let mut read_buf = vec![0u8; 256];
        let produced = TransactionRouter::read_commands(&b_proc, &b_thread, &mut read_buf).unwrap();
        assert!(produced > 0);
        assert_eq!(u32::from_le_bytes(read_buf[0..4].try_into().unwrap()), BinderReturn::Transaction.into());

        let mut a_read = vec![0u8; 64];
        let a_produced = TransactionRouter::read_commands(&a_proc, &a_thread, &mut a_read).unwrap();
        assert_eq!(u32::from_le_bytes(a_read[0..4].try_into().unwrap()), BinderReturn::TransactionComplete.into());
        assert_eq!(a_produced, 4);
        assert_eq!(a_thread.pending_replies(), 1);

        let mut reply_buf = Vec::new();
        reply_buf.extend_from_slice(&1u32.to_le_bytes()); // BC_REPLY
        reply_buf.extend_from_slice(&encode_transaction(false, 0, 0, 0, 0, b"pong"));
        TransactionRouter::write_commands(&b_proc, &b_thread, &reply_buf, context_manager, &resolver).unwrap();

        let mut a_read2 = vec![0u8; 256];
        TransactionRouter::read_commands(&a_proc, &a_thread, &mut a_read2).unwrap();
        assert_eq!(u32::from_le_bytes(a_read2[0..4].try_into().unwrap()), BinderReturn::Reply.into());
        assert_eq!(a_thread.pending_replies(), 0);
    }

    #[test]
    fn one_way_transaction_skips_pending_replies_and_incoming_stack() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();

        let a_proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let b_proc = ProcessRecord::new(2, 0, bus.new_queue(), 4, false);
        let target = b_proc.registry.insert_or_get(b_proc.id(), 9);

        let a_thread = a_proc.worker_for(1, || bus.new_queue());
        let a_local = a_proc.registry.insert_or_get(b_proc.id(), 9);
        assert_eq!(a_local.id, target.id);

        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&encode_transaction(
            true,
            b_proc.id().as_u64(),
            9,
            1,
            protocol::TransactionFlags::ONE_WAY.bits(),
            b"hi",
        ));
        TransactionRouter::write_commands(&a_proc, &a_thread, &buf, None, &resolver).unwrap();

        assert_eq!(a_thread.pending_replies(), 0);

        let b_thread = b_proc.worker_for(1, || bus.new_queue());
        let mut read_buf = vec![0u8; 128];
        TransactionRouter::read_commands(&b_proc, &b_thread, &mut read_buf).unwrap();
        assert_eq!(b_thread.pop_incoming_transaction(), Err(BinderError::FailedReply));
    }

    #[test]
    fn malformed_opcode_aborts_batch() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let thread = proc.worker_for(1, || bus.new_queue());
        let buf = 0xFFFF_FFFFu32.to_le_bytes();
        let err = TransactionRouter::write_commands(&proc, &thread, &buf, None, &resolver).unwrap_err();
        assert_eq!(err, BinderError::InvalidArgument);
    }

    #[test]
    fn truncated_payload_is_fault() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let thread = proc.worker_for(1, || bus.new_queue());
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // BC_TRANSACTION
        buf.extend_from_slice(&0u64.to_le_bytes()); // target
        // cut off mid-header
        let err = TransactionRouter::write_commands(&proc, &thread, &buf, None, &resolver).unwrap_err();
        assert_eq!(err, BinderError::Fault);
    }

    #[test]
    fn target_not_found_surfaces_dead_reply_on_next_read() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let thread = proc.worker_for(1, || bus.new_queue());

        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&encode_transaction(true, proc.id().as_u64(), 404, 1, 0, b"x"));
        TransactionRouter::write_commands(&proc, &thread, &buf, None, &resolver).unwrap();

        let mut read_buf = vec![0u8; 64];
        TransactionRouter::read_commands(&proc, &thread, &mut read_buf).unwrap();
        assert_eq!(u32::from_le_bytes(read_buf[0..4].try_into().unwrap()), BinderReturn::DeadReply.into());
    }

    #[test]
    fn read_buffer_too_small_requeues_at_head() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let thread = proc.worker_for(1, || bus.new_queue());
        let thread_queue_id = thread.queue.id();
        let _ = thread_queue_id;

        thread.queue.push_tail(Message::Transaction {
            code: 1,
            flags: TransactionFlags::empty(),
            sender_pid: 1,
            sender_euid: 1,
            payload: TransactionPayload::new(vec![1, 2, 3, 4, 5, 6, 7, 8], vec![]),
            reply_queue: Some(thread.queue.id()),
        });

        let mut tiny_buf = vec![0u8; 2];
        let produced = TransactionRouter::read_commands(&proc, &thread, &mut tiny_buf).unwrap();
        assert_eq!(produced, 0);
        assert_eq!(thread.queue.size(), 1); // pushed back

        let mut big_buf = vec![0u8; 256];
        let produced2 = TransactionRouter::read_commands(&proc, &thread, &mut big_buf).unwrap();
        assert!(produced2 > 0);
    }

    /// spec.md §5: "for non-blocking processes it returns immediately" with
    /// no carve-out for a pending reply. A non-blocking process awaiting a
    /// reply (private queue preferred, but empty) must not block.
    #[test]
    fn non_blocking_process_returns_immediately_awaiting_reply() {
        let bus = Arc::new(TestBus::new());
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, true);
        let thread = proc.worker_for(1, || bus.new_queue());
        thread.inc_pending_replies();

        let mut read_buf = vec![0u8; 64];
        let produced = TransactionRouter::read_commands(&proc, &thread, &mut read_buf).unwrap();
        assert_eq!(produced, 0);
    }

    #[test]
    fn transaction_with_unknown_embedded_handle_surfaces_failed_reply() {
        let bus = Arc::new(TestBus::new());
        let resolver = bus.resolver();
        let proc = ProcessRecord::new(1, 0, bus.new_queue(), 4, false);
        let thread = proc.worker_for(1, || bus.new_queue());
        // A self-addressed object so `resolve_target` succeeds and
        // execution reaches write-side translation.
        let target_object = proc.registry.insert_or_get(proc.id(), 5);

        // Embed an ObjectTag::Handle descriptor the sender's own registry
        // has never heard of (write-side protocol violation).
        let bad_object = protocol::FlatObject {
            tag: protocol::ObjectTag::Handle,
            flags: 0,
            binder: 1,
            cookie: 999,
        };
        let mut data = bad_object.to_bytes().to_vec();
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // BC_TRANSACTION
        buf.extend_from_slice(&target_object.id.owner.as_u64().to_le_bytes());
        buf.extend_from_slice(&target_object.id.local_key.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // code
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // offsets_count
        buf.append(&mut data);
        buf.extend_from_slice(&0u64.to_le_bytes()); // offsets[0]

        TransactionRouter::write_commands(&proc, &thread, &buf, None, &resolver).unwrap();

        let mut read_buf = vec![0u8; 64];
        TransactionRouter::read_commands(&proc, &thread, &mut read_buf).unwrap();
        assert_eq!(u32::from_le_bytes(read_buf[0..4].try_into().unwrap()), BinderReturn::FailedReply.into());
    }
}
