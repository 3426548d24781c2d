//! Wire-level constants: opcodes, transaction flags, and the embedded
//! flat-object descriptor. Mirrors the shape of the teacher's
//! `BinderDriverCommandProtocol`/`BinderDriverReturnProtocol`/`BinderType`,
//! but with sequential discriminants rather than AOSP's packed-char ioctl
//! numbers, since wire compatibility with a real `/dev/binder` is out of
//! scope (see DESIGN.md Open Questions).

use std::convert::{TryFrom, TryInto};

use crate::error::{BinderError, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Transactions larger than this are rejected with `FailedReply` during
/// allocation (spec.md §6).
pub const MAX_TRANSACTION_SIZE: usize = 4000;

/// Host -> core opcodes (spec.md §6, write side).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum BinderCommand {
    Transaction = 0,
    Reply = 1,
    RequestDeathNotification = 2,
    ClearDeathNotification = 3,
    EnterLooper = 4,
    ExitLooper = 5,
    RegisterLooper = 6,
}

/// Core -> host opcodes (spec.md §6, read side).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum BinderReturn {
    Transaction = 0,
    Reply = 1,
    TransactionComplete = 2,
    DeadBinder = 3,
    ClearDeathNotificationDone = 4,
    SpawnLooper = 5,
    FailedReply = 6,
    DeadReply = 7,
}

bitflags! {
    /// Transaction flags (spec.md §6). `ONE_WAY` is the only one the router
    /// inspects directly; the rest are carried through unchanged for the
    /// receiver.
    pub struct TransactionFlags: u32 {
        const ONE_WAY      = 1;
        const ROOT_OBJECT  = 4;
        const STATUS_CODE  = 8;
        const ACCEPT_FDS   = 16;
    }
}

/// The tag of an embedded flat-object descriptor (spec.md §4.3, §6).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum ObjectTag {
    /// An exported object, as seen by its owner.
    Binder = 0,
    WeakBinder = 1,
    /// The same object, as seen by a different process.
    Handle = 2,
    WeakHandle = 3,
}

/// A flat-object descriptor embedded in a transaction payload at one of its
/// `offsets` (spec.md §6 "Embedded descriptor").
///
/// `binder` carries the owner-local key; on the wire, `cookie` carries
/// either the owner-chosen opaque cookie (`Binder`/`WeakBinder`, sender
/// side) or the encoded owner `QueueId` (`Handle`/`WeakHandle`) — see
/// `translate.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatObject {
    pub tag: ObjectTag,
    pub flags: u32,
    pub binder: u64,
    pub cookie: u64,
}

impl FlatObject {
    pub const WIRE_SIZE: usize = 4 + 4 + 8 + 8;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&u32::from(self.tag).to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.binder.to_le_bytes());
        buf[16..24].copy_from_slice(&self.cookie.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(BinderError::InvalidArgument);
        }
        let tag_raw = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let tag = ObjectTag::try_from(tag_raw).map_err(|_| BinderError::InvalidArgument)?;
        let flags = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let binder = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let cookie = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        Ok(Self { tag, flags, binder, cookie })
    }
}

/// Enforces spec.md §6's size invariant:
/// `offsets_size * sizeof(flat_object)/sizeof(offset) + offsets_size <= data_size`
/// (i.e. every offset plus the object it points at must fit inside the
/// data buffer), and the overall `MAX_TRANSACTION_SIZE` cap.
pub fn validate_transaction_size(data_size: usize, offsets: &[usize]) -> Result<()> {
    if data_size > MAX_TRANSACTION_SIZE {
        return Err(BinderError::FailedReply);
    }
    for &offset in offsets {
        let end = offset.checked_add(FlatObject::WIRE_SIZE).ok_or(BinderError::InvalidArgument)?;
        if end > data_size {
            return Err(BinderError::InvalidArgument);
        }
    }
    Ok(())
}

/// 32-bit alignment used when sizing allocated message buffers (spec.md
/// §4.4: "`align(data_size) + align(offsets_size)`").
pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_object_round_trips_through_bytes() {
        let obj = FlatObject { tag: ObjectTag::Handle, flags: 7, binder: 42, cookie: 0xC0FFEE };
        let bytes = obj.to_bytes();
        let back = FlatObject::from_bytes(&bytes).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn from_bytes_rejects_truncated_input() {
        let short = [0u8; 4];
        assert_eq!(FlatObject::from_bytes(&short), Err(BinderError::InvalidArgument));
    }

    #[test]
    fn from_bytes_rejects_unknown_tag() {
        let mut buf = [0u8; FlatObject::WIRE_SIZE];
        buf[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(FlatObject::from_bytes(&buf), Err(BinderError::InvalidArgument));
    }

    #[test]
    fn validate_rejects_oversized_transaction() {
        assert_eq!(validate_transaction_size(MAX_TRANSACTION_SIZE + 1, &[]), Err(BinderError::FailedReply));
    }

    #[test]
    fn validate_rejects_offset_past_data() {
        assert_eq!(
            validate_transaction_size(10, &[8]),
            Err(BinderError::InvalidArgument)
        );
    }

    #[test]
    fn align4_rounds_up_to_multiple_of_four() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }
}
