//! `Parcel`: a little-endian byte-buffer builder/reader for structured
//! payloads layered on top of a raw `TransactionPayload` (spec.md §3,
//! "data/offsets pair"). Demos and higher-level services build their
//! request/response bodies with this rather than poking at
//! `TransactionPayload.data` directly.

use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BinderError, Result};
use crate::message::TransactionPayload;
use crate::parcelable::Parcelable;
use crate::protocol::FlatObject;

const STRICT_MODE_PENALTY_GATHER: i32 = 1 << 31;
const HEADER: i32 = 0x5359_5354; // "SYST"

/// Owned, growable byte buffer with 4-byte-aligned primitive reads/writes
/// and offset bookkeeping for embedded `FlatObject` descriptors.
pub struct Parcel {
    cursor: Cursor<Vec<u8>>,
    object_offsets: Vec<usize>,
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("data", &self.cursor.get_ref())
            .field("offsets", &self.object_offsets)
            .finish()
    }
}

impl Parcel {
    pub fn empty() -> Self {
        Self { cursor: Cursor::new(Vec::new()), object_offsets: Vec::new() }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self { cursor: Cursor::new(data.to_vec()), object_offsets: Vec::new() }
    }

    /// Builds a `Parcel` ready for reading from a transaction payload
    /// already produced by `router.rs`/`translate.rs`.
    pub fn from_payload(payload: &TransactionPayload) -> Self {
        Self { cursor: Cursor::new(payload.data.clone()), object_offsets: payload.offsets.clone() }
    }

    /// Consumes this `Parcel` into a `TransactionPayload` ready to hand to
    /// `write_commands`.
    pub fn into_payload(self) -> TransactionPayload {
        TransactionPayload::new(self.cursor.into_inner(), self.object_offsets)
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn set_position(&mut self, pos: u64) {
        self.cursor.set_position(pos)
    }

    pub fn to_slice(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.get_ref().is_empty()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.object_offsets
    }

    pub fn has_unread_data(&self) -> bool {
        self.cursor.position() != self.len() as u64
    }

    pub fn write_i32(&mut self, data: i32) -> Result<()> {
        self.cursor.write_i32::<LittleEndian>(data).map_err(|_| BinderError::Fault)
    }

    pub fn write_u32(&mut self, data: u32) -> Result<()> {
        self.cursor.write_u32::<LittleEndian>(data).map_err(|_| BinderError::Fault)
    }

    pub fn write_u64(&mut self, data: u64) -> Result<()> {
        self.cursor.write_u64::<LittleEndian>(data).map_err(|_| BinderError::Fault)
    }

    pub fn write_u16(&mut self, data: u16) -> Result<()> {
        self.cursor.write_u16::<LittleEndian>(data).map_err(|_| BinderError::Fault)
    }

    pub fn write_bool(&mut self, data: bool) -> Result<()> {
        self.write_u32(data as u32)
    }

    pub fn write_u8(&mut self, data: u8) -> Result<()> {
        self.cursor.write_u8(data).map_err(|_| BinderError::Fault)
    }

    pub fn write_usize(&mut self, data: usize) -> Result<()> {
        self.write_u64(data as u64)
    }

    /// Write a byte slice, zero-padded up to a 4-byte boundary (spec.md §6
    /// wire shapes are all 4-byte aligned).
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let padded_len = (data.len() + 3) & !3;
        let mut buf = data.to_vec();
        buf.resize(padded_len, 0);
        self.cursor.write_all(&buf).map_err(|_| BinderError::Fault)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| BinderError::Fault)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(|_| BinderError::Fault)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|_| BinderError::Fault)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LittleEndian>().map_err(|_| BinderError::Fault)
    }

    pub fn read_usize(&mut self) -> Result<usize> {
        Ok(self.read_u64()? as usize)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(|_| BinderError::Fault)
    }

    /// Read a 4-byte-aligned slice of `size` unpadded bytes.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        let padded = if size % 4 != 0 { size + 4 - (size % 4) } else { size };
        let mut data = vec![0u8; padded];
        self.cursor.read_exact(&mut data).map_err(|_| BinderError::Fault)?;
        data.truncate(size);
        Ok(data)
    }

    /// Record the current position as an embedded `FlatObject`'s offset,
    /// then write it.
    pub fn write_flat_object(&mut self, obj: FlatObject) -> Result<()> {
        self.object_offsets.push(self.cursor.position() as usize);
        self.write(&obj.to_bytes())
    }

    pub fn read_flat_object(&mut self) -> Result<FlatObject> {
        let bytes = self.read(FlatObject::WIRE_SIZE)?;
        FlatObject::from_bytes(&bytes)
    }

    /// Serialize a `Parcelable` value (demos build request/response bodies
    /// out of these rather than raw primitives).
    pub fn write_value<T: Parcelable>(&mut self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    pub fn read_value<T: Parcelable>(&mut self) -> Result<T> {
        T::deserialize(self)
    }

    /// Write a UTF-16 string, AOSP `String16` style (length-prefixed,
    /// NUL-terminated, 4-byte padded).
    pub fn write_str16(&mut self, string: &str) -> Result<()> {
        self.write_i32(string.len() as i32)?;
        let mut s16: Vec<u8> = Vec::new();
        for c in string.encode_utf16() {
            s16.write_u16::<LittleEndian>(c).map_err(|_| BinderError::Fault)?;
        }
        s16.write_u16::<LittleEndian>(0).map_err(|_| BinderError::Fault)?;
        if s16.len() % 4 != 0 {
            s16.resize(s16.len() + 4 - (s16.len() % 4), 0);
        }
        self.cursor.write_all(&s16).map_err(|_| BinderError::Fault)
    }

    pub fn write_str(&mut self, string: &str) -> Result<()> {
        self.write_i32(string.len() as i32)?;
        let mut s8 = string.as_bytes().to_vec();
        s8.push(0);
        if s8.len() % 4 != 0 {
            s8.resize(s8.len() + 4 - (s8.len() % 4), 0);
        }
        self.cursor.write_all(&s8).map_err(|_| BinderError::Fault)
    }

    pub fn read_str16(&mut self) -> Result<String> {
        let len = (self.read_i32()? + 1) as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let raw = self.read(len * 2)?;
        let u16_array: Vec<u16> = raw.chunks_exact(2).map(|a| u16::from_le_bytes([a[0], a[1]])).collect();
        let mut res = String::from_utf16(&u16_array).map_err(|_| BinderError::Fault)?;
        res.truncate(len - 1);
        Ok(res)
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = (self.read_i32()? + 1) as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let raw = self.read(len)?;
        let mut res = String::from_utf8(raw).map_err(|_| BinderError::Fault)?;
        res.truncate(len - 1);
        Ok(res)
    }

    /// Read the `AIDL` interface-token preamble a real binder client sends
    /// ahead of every call's argument body: strict-mode policy mask, work
    /// source uid, header marker, then the interface name.
    pub fn read_interface_token(&mut self) -> Result<String> {
        self.read_i32()?;
        if self.read_i32()? != -1 {
            return Err(BinderError::InvalidArgument);
        }
        if self.read_i32()? != HEADER {
            return Err(BinderError::InvalidArgument);
        }
        self.read_str16()
    }

    pub fn write_interface_token(&mut self, name: &str) -> Result<()> {
        self.write_i32(STRICT_MODE_PENALTY_GATHER | 0x4200_0004)?;
        self.write_i32(-1)?;
        self.write_i32(HEADER)?;
        self.write_str16(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ObjectTag;

    #[test]
    fn round_trips_primitives() {
        let mut p = Parcel::empty();
        p.write_u32(42).unwrap();
        p.write_i32(-7).unwrap();
        p.write_bool(true).unwrap();
        p.set_position(0);
        assert_eq!(p.read_u32().unwrap(), 42);
        assert_eq!(p.read_i32().unwrap(), -7);
        assert!(bool::deserialize(&mut p).unwrap());
    }

    #[test]
    fn round_trips_strings() {
        let mut p = Parcel::empty();
        p.write_str("hello").unwrap();
        p.write_str16("world").unwrap();
        p.set_position(0);
        assert_eq!(p.read_str().unwrap(), "hello");
        assert_eq!(p.read_str16().unwrap(), "world");
    }

    #[test]
    fn interface_token_round_trips() {
        let mut p = Parcel::empty();
        p.write_interface_token("IEcho").unwrap();
        p.set_position(0);
        assert_eq!(p.read_interface_token().unwrap(), "IEcho");
    }

    #[test]
    fn flat_object_offset_is_recorded() {
        let mut p = Parcel::empty();
        p.write_u32(0).unwrap(); // some leading field
        p.write_flat_object(FlatObject { tag: ObjectTag::Binder, flags: 0, binder: 3, cookie: 9 }).unwrap();
        assert_eq!(p.offsets(), &[4]);
        p.set_position(4);
        let obj = p.read_flat_object().unwrap();
        assert_eq!(obj.binder, 3);
    }

    #[test]
    fn payload_round_trip() {
        let mut p = Parcel::empty();
        p.write_str("ping").unwrap();
        let payload = p.into_payload();
        let mut p2 = Parcel::from_payload(&payload);
        assert_eq!(p2.read_str().unwrap(), "ping");
    }
}
