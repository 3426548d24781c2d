//! In-process echo service: one thread boots a context manager and serves a
//! single echo transaction, another sends it and prints the reply.
//!
//! Reproduces spec.md §8 scenario 1 (context-manager bootstrap) without a
//! real `/dev/binder` — a `Driver` and a pair of `std::thread`s stand in for
//! the two processes.

use std::convert::{TryFrom, TryInto};
use std::sync::Arc;
use std::thread;

use binder_dispatch::{BinderCommand, BinderReturn, Driver, DriverConfig, Parcel, WriteRead};

const ECHO: u32 = 1;

fn encode_transaction(owner: u64, local_key: u64, code: u32, flags: u32, payload: &Parcel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&u32::from(BinderCommand::Transaction).to_le_bytes());
    buf.extend_from_slice(&owner.to_le_bytes());
    buf.extend_from_slice(&local_key.to_le_bytes());
    buf.extend_from_slice(&code.to_le_bytes());
    buf.extend_from_slice(&flags.to_le_bytes());
    let data = payload.to_slice();
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

fn encode_reply(payload: &Parcel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&u32::from(BinderCommand::Reply).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // code: unused on a reply
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags
    let data = payload.to_slice();
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

enum Reply {
    TransactionComplete,
    Transaction { code: u32, payload: Vec<u8> },
    Reply { payload: Vec<u8> },
    Other,
}

/// Decodes one `BR_*` record starting at `*pos`, bumping `*pos` past it.
fn decode_one(buf: &[u8], pos: &mut usize) -> Reply {
    let op_raw = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    let op = BinderReturn::try_from(op_raw).expect("unknown BR_* opcode");
    match op {
        BinderReturn::TransactionComplete => Reply::TransactionComplete,
        BinderReturn::Transaction => {
            *pos += 8; // sender_pid, sender_euid
            let code = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
            *pos += 8; // code, flags
            let data_size = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap()) as usize;
            *pos += 8;
            let offsets_count = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap()) as usize;
            *pos += 8;
            let payload = buf[*pos..*pos + data_size].to_vec();
            *pos += data_size + offsets_count * 8;
            Reply::Transaction { code, payload }
        }
        BinderReturn::Reply => {
            *pos += 8; // sender_pid, sender_euid
            let data_size = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap()) as usize;
            *pos += 8;
            let offsets_count = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap()) as usize;
            *pos += 8;
            let payload = buf[*pos..*pos + data_size].to_vec();
            *pos += data_size + offsets_count * 8;
            Reply::Reply { payload }
        }
        _ => Reply::Other,
    }
}

fn main() {
    env_logger::try_init().ok();

    let driver = Arc::new(Driver::new());

    let server = driver.open(1000, 0, DriverConfig::default());
    let echo_object = server.registry.insert_or_get(server.id(), 1);
    driver.set_context_manager(&server, echo_object.id.local_key).unwrap();

    let client = driver.open(2000, 0, DriverConfig::default());

    let driver_for_server = driver.clone();
    let server_proc = server.clone();
    let server_thread = thread::spawn(move || {
        let tid = driver_for_server.next_tid();
        let worker = driver_for_server.worker(&server_proc, tid);
        let mut read_buf = vec![0u8; 4096];

        // Serve exactly one request, then exit.
        let io_write = Vec::new();
        {
            let mut io = WriteRead::new(&io_write, &mut read_buf);
            driver_for_server.write_read(&server_proc, &worker, &mut io).unwrap();
        }

        let mut pos = 0;
        let (code, payload) = match decode_one(&read_buf, &mut pos) {
            Reply::Transaction { code, payload } => (code, payload),
            _ => panic!("expected BR_TRANSACTION"),
        };
        assert_eq!(code, ECHO);

        let mut request = Parcel::from_slice(&payload);
        let message = request.read_str().unwrap();
        println!("[server] received: {message}");

        let mut response = Parcel::empty();
        response.write_str(&format!("echo: {message}")).unwrap();
        let reply_buf = encode_reply(&response);

        let mut read_buf2 = vec![0u8; 256];
        {
            let mut io2 = WriteRead::new(&reply_buf, &mut read_buf2);
            driver_for_server.write_read(&server_proc, &worker, &mut io2).unwrap();
        }
    });

    let tid = driver.next_tid();
    let worker = driver.worker(&client, tid);

    let mut request = Parcel::empty();
    request.write_str("hello").unwrap();
    // `owner = 0` is the context-manager sentinel (driver.rs, router.rs).
    let write_buf = encode_transaction(0, 0, ECHO, 0, &request);

    let mut read_buf = vec![0u8; 256];
    {
        let mut io = WriteRead::new(&write_buf, &mut read_buf);
        driver.write_read(&client, &worker, &mut io).unwrap();
    }
    let mut pos = 0;
    assert!(matches!(decode_one(&read_buf, &mut pos), Reply::TransactionComplete));

    let empty = Vec::new();
    let mut read_buf2 = vec![0u8; 256];
    {
        let mut io2 = WriteRead::new(&empty, &mut read_buf2);
        driver.write_read(&client, &worker, &mut io2).unwrap();
    }
    let mut pos2 = 0;
    match decode_one(&read_buf2, &mut pos2) {
        Reply::Reply { payload } => {
            let mut response = Parcel::from_slice(&payload);
            println!("[client] received: {}", response.read_str().unwrap());
        }
        _ => panic!("expected BR_REPLY"),
    }

    server_thread.join().unwrap();
    driver.release(1000);
    driver.release(2000);
}
