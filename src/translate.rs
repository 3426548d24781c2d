//! Handle Translator (spec.md §4.3): rewrites embedded object descriptors
//! as a transaction payload crosses a process boundary.

use crate::error::{BinderError, Result};
use crate::message::{QueueId, TransactionPayload};
use crate::protocol::{FlatObject, ObjectTag};
use crate::registry::ObjectRegistry;

fn read_flat_object(payload: &TransactionPayload, offset: usize) -> Result<FlatObject> {
    let end = offset.checked_add(FlatObject::WIRE_SIZE).ok_or(BinderError::InvalidArgument)?;
    let bytes = payload.data.get(offset..end).ok_or(BinderError::InvalidArgument)?;
    FlatObject::from_bytes(bytes)
}

fn write_flat_object(payload: &mut TransactionPayload, offset: usize, obj: FlatObject) -> Result<()> {
    let end = offset.checked_add(FlatObject::WIRE_SIZE).ok_or(BinderError::InvalidArgument)?;
    let slot = payload.data.get_mut(offset..end).ok_or(BinderError::InvalidArgument)?;
    slot.copy_from_slice(&obj.to_bytes());
    Ok(())
}

/// Write-side translation (spec.md §4.3 "Write-side (sender view)"), run on
/// a transaction as it leaves the sender. `sender_registry`/`sender_queue`
/// identify the sender whose objects are being exported or referenced.
pub fn translate_write_side(
    payload: &mut TransactionPayload,
    sender_registry: &ObjectRegistry,
    sender_queue: QueueId,
) -> Result<()> {
    for offset in payload.offsets.clone() {
        let obj = read_flat_object(payload, offset)?;
        match obj.tag {
            ObjectTag::Binder | ObjectTag::WeakBinder => {
                let entry = sender_registry.insert_or_get(sender_queue, obj.binder);
                entry.set_real_cookie(obj.cookie);
                let new_tag = if obj.tag == ObjectTag::Binder { ObjectTag::Handle } else { ObjectTag::WeakHandle };
                write_flat_object(
                    payload,
                    offset,
                    FlatObject { tag: new_tag, flags: obj.flags, binder: obj.binder, cookie: sender_queue.as_u64() },
                )?;
            }
            ObjectTag::Handle | ObjectTag::WeakHandle => {
                let owner = QueueId::from_u64(obj.cookie);
                if sender_registry.find(owner, obj.binder).is_none() {
                    // The sender named a handle its own registry doesn't
                    // recognise: a protocol violation by the caller, not a
                    // framing fault (spec.md §7).
                    return Err(BinderError::FailedReply);
                }
                // Already in receiver-facing form; nothing to rewrite.
            }
        }
    }
    Ok(())
}

/// Read-side translation (spec.md §4.3 "Read-side (receiver view)"), run on
/// a transaction as it arrives at its destination. `receiver_registry`/
/// `receiver_queue` identify the process receiving the payload.
pub fn translate_read_side(
    payload: &mut TransactionPayload,
    receiver_registry: &ObjectRegistry,
    receiver_queue: QueueId,
) -> Result<()> {
    for offset in payload.offsets.clone() {
        let obj = read_flat_object(payload, offset)?;
        match obj.tag {
            ObjectTag::Handle | ObjectTag::WeakHandle => {
                let owner = QueueId::from_u64(obj.cookie);
                if owner == receiver_queue {
                    // The receiver is getting back an object it originally
                    // exported: restore its own view of it.
                    let entry = receiver_registry
                        .find_local(obj.binder)
                        .ok_or(BinderError::InvalidArgument)?;
                    let new_tag = if obj.tag == ObjectTag::Handle { ObjectTag::Binder } else { ObjectTag::WeakBinder };
                    write_flat_object(
                        payload,
                        offset,
                        FlatObject { tag: new_tag, flags: obj.flags, binder: obj.binder, cookie: entry.real_cookie() },
                    )?;
                } else {
                    // A reference into a third process; materialise it if
                    // this is the first time the receiver has seen it.
                    receiver_registry.insert_or_get(owner, obj.binder);
                }
            }
            ObjectTag::Binder | ObjectTag::WeakBinder => {
                // A sender is only ever supposed to hand out its own
                // objects pre-translated to `Handle`/`WeakHandle`
                // (`translate_write_side` above); seeing the owner-local
                // tag here means the caller skipped write-side translation,
                // a protocol violation rather than a framing fault.
                return Err(BinderError::FailedReply);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FlatObject;

    fn payload_with_object(obj: FlatObject) -> TransactionPayload {
        let mut data = vec![0u8; FlatObject::WIRE_SIZE];
        data.copy_from_slice(&obj.to_bytes());
        TransactionPayload::new(data, vec![0])
    }

    #[test]
    fn write_side_exports_binder_as_handle() {
        let registry = ObjectRegistry::new(QueueId::from_u64(1));
        let mut payload = payload_with_object(FlatObject {
            tag: ObjectTag::Binder,
            flags: 0,
            binder: 55,
            cookie: 0xC0FFEE,
        });

        translate_write_side(&mut payload, &registry, QueueId::from_u64(1)).unwrap();

        let rewritten = read_flat_object(&payload, 0).unwrap();
        assert_eq!(rewritten.tag, ObjectTag::Handle);
        assert_eq!(rewritten.binder, 55);
        assert_eq!(rewritten.cookie, 1); // encoded owner QueueId

        let entry = registry.find_local(55).unwrap();
        assert_eq!(entry.real_cookie(), 0xC0FFEE);
    }

    #[test]
    fn write_side_rejects_unknown_handle() {
        let registry = ObjectRegistry::new(QueueId::from_u64(1));
        let mut payload = payload_with_object(FlatObject {
            tag: ObjectTag::Handle,
            flags: 0,
            binder: 1,
            cookie: 9,
        });
        let err = translate_write_side(&mut payload, &registry, QueueId::from_u64(1)).unwrap_err();
        assert_eq!(err, BinderError::FailedReply);
    }

    #[test]
    fn read_side_rejects_binder_tag() {
        let registry = ObjectRegistry::new(QueueId::from_u64(2));
        let mut payload = payload_with_object(FlatObject {
            tag: ObjectTag::Binder,
            flags: 0,
            binder: 1,
            cookie: 1,
        });
        let err = translate_read_side(&mut payload, &registry, QueueId::from_u64(2)).unwrap_err();
        assert_eq!(err, BinderError::FailedReply);
    }

    #[test]
    fn full_round_trip_restores_original_descriptor() {
        // A exports object X (cookie 0xC0FFEE) to B.
        let a_registry = ObjectRegistry::new(QueueId::from_u64(1));
        let b_registry = ObjectRegistry::new(QueueId::from_u64(2));

        let mut out = payload_with_object(FlatObject {
            tag: ObjectTag::Binder,
            flags: 0,
            binder: 77,
            cookie: 0xC0FFEE,
        });
        translate_write_side(&mut out, &a_registry, QueueId::from_u64(1)).unwrap();
        translate_read_side(&mut out, &b_registry, QueueId::from_u64(2)).unwrap();

        // B now holds a reference; B sends it back inside a reply.
        let b_ref = b_registry.find(QueueId::from_u64(1), 77);
        assert!(b_ref.is_some());

        translate_write_side(&mut out, &b_registry, QueueId::from_u64(2)).unwrap();
        translate_read_side(&mut out, &a_registry, QueueId::from_u64(1)).unwrap();

        let restored = read_flat_object(&out, 0).unwrap();
        assert_eq!(restored.tag, ObjectTag::Binder);
        assert_eq!(restored.cookie, 0xC0FFEE);
        assert_eq!(restored.binder, 77);
    }
}
