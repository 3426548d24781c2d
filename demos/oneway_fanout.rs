//! One-way fire-and-forget fan-out: a sender posts several `ONE_WAY`
//! transactions at a receiver's object without ever waiting on a reply.
//!
//! Reproduces spec.md §8 scenario 6: `pending_replies` never moves off zero
//! and only `BR_TRANSACTION_COMPLETE` ever reaches the sender.

use std::convert::{TryFrom, TryInto};
use std::sync::Arc;
use std::thread;

use binder_dispatch::{BinderCommand, BinderReturn, Driver, DriverConfig, Parcel, TransactionFlags, WriteRead};

const LOG_EVENT: u32 = 1;
const EVENTS: [&str; 3] = ["started", "progress 50%", "finished"];

fn encode_one_way(owner: u64, local_key: u64, code: u32, payload: &Parcel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&u32::from(BinderCommand::Transaction).to_le_bytes());
    buf.extend_from_slice(&owner.to_le_bytes());
    buf.extend_from_slice(&local_key.to_le_bytes());
    buf.extend_from_slice(&code.to_le_bytes());
    buf.extend_from_slice(&TransactionFlags::ONE_WAY.bits().to_le_bytes());
    let data = payload.to_slice();
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Reads exactly one `BR_*` record from the start of `buf` and, if it's a
/// transaction, returns its payload bytes.
fn expect_transaction(buf: &[u8]) -> Vec<u8> {
    let mut pos = 0usize;
    let op_raw = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    assert_eq!(BinderReturn::try_from(op_raw).unwrap(), BinderReturn::Transaction);
    pos += 8; // sender_pid, sender_euid
    pos += 8; // code, flags
    let data_size = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()) as usize;
    pos += 8;
    let _offsets_count = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    buf[pos..pos + data_size].to_vec()
}

fn main() {
    env_logger::try_init().ok();

    let driver = Arc::new(Driver::new());

    let receiver = driver.open(10, 0, DriverConfig::default());
    let log_sink = receiver.registry.insert_or_get(receiver.id(), 1);

    let sender = driver.open(20, 0, DriverConfig::default());
    // A real client only ever addresses a handle it was already handed by
    // some earlier transaction; seed that reference directly here rather
    // than modelling the earlier exchange that would have produced it.
    sender.registry.insert_or_get(log_sink.id.owner, log_sink.id.local_key);

    let driver_for_receiver = driver.clone();
    let receiver_proc = receiver.clone();
    let receiver_thread = thread::spawn(move || {
        let tid = driver_for_receiver.next_tid();
        let worker = driver_for_receiver.worker(&receiver_proc, tid);
        let mut received = Vec::new();
        for _ in 0..EVENTS.len() {
            let write_buf = Vec::new();
            let mut read_buf = vec![0u8; 512];
            let produced = {
                let mut io = WriteRead::new(&write_buf, &mut read_buf);
                driver_for_receiver.write_read(&receiver_proc, &worker, &mut io).unwrap();
                io.read_produced
            };
            let payload = expect_transaction(&read_buf[..produced]);
            let mut parcel = Parcel::from_slice(&payload);
            received.push(parcel.read_str().unwrap());
        }
        received
    });

    let tid = driver.next_tid();
    let worker = driver.worker(&sender, tid);
    for event in EVENTS {
        let mut payload = Parcel::empty();
        payload.write_str(event).unwrap();
        let write_buf = encode_one_way(log_sink.id.owner.as_u64(), log_sink.id.local_key, LOG_EVENT, &payload);
        let mut read_buf = vec![0u8; 64];
        {
            let mut io = WriteRead::new(&write_buf, &mut read_buf);
            driver.write_read(&sender, &worker, &mut io).unwrap();
        }

        let op_raw = u32::from_le_bytes(read_buf[0..4].try_into().unwrap());
        assert_eq!(BinderReturn::try_from(op_raw).unwrap(), BinderReturn::TransactionComplete);
        assert_eq!(worker.pending_replies(), 0);
    }

    let received = receiver_thread.join().unwrap();
    for (event, got) in EVENTS.iter().zip(received.iter()) {
        println!("[receiver] logged: {got}");
        assert_eq!(got.as_str(), *event);
    }

    driver.release(10);
    driver.release(20);
}
