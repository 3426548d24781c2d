//! `Parcelable`: the serialize/deserialize trait structured payloads are
//! built from, plus impls for the primitive and container types demos need.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::Result;
use crate::parcel::Parcel;

pub trait Parcelable {
    fn deserialize(parcel: &mut Parcel) -> Result<Self>
    where
        Self: Sized;
    fn serialize(&self, parcel: &mut Parcel) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct String16(pub String);

macro_rules! implement_primitive {
    ($ty:ty, $func:ident, $wty:ty, $wfunc:ident) => {
        impl Parcelable for $ty {
            fn deserialize(parcel: &mut Parcel) -> Result<Self> {
                Ok(parcel.$func()? as $ty)
            }
            fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
                parcel.$wfunc(*self as $wty)
            }
        }
    };
}

implement_primitive!(u8, read_u8, u8, write_u8);
implement_primitive!(i8, read_u8, u8, write_u8);
implement_primitive!(u16, read_u16, u16, write_u16);
implement_primitive!(i16, read_u16, u16, write_u16);
implement_primitive!(i32, read_i32, i32, write_i32);
implement_primitive!(u32, read_u32, u32, write_u32);
implement_primitive!(u64, read_u64, u64, write_u64);
implement_primitive!(usize, read_usize, usize, write_usize);

impl Parcelable for bool {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        Ok(parcel.read_i32()? != 0)
    }

    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_i32(if *self { 1 } else { 0 })
    }
}

impl Parcelable for String {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        parcel.read_str()
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_str(self)
    }
}

impl Parcelable for String16 {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        Ok(String16(parcel.read_str16()?))
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_str16(&self.0)
    }
}

impl<T: Parcelable> Parcelable for Option<T> {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        let prefix = parcel.read_i32()?;
        Ok(if prefix != 0 { Some(T::deserialize(parcel)?) } else { None })
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        match self {
            Some(inner) => {
                parcel.write_i32(1)?;
                inner.serialize(parcel)
            }
            None => parcel.write_i32(0),
        }
    }
}

impl<T: Parcelable> Parcelable for Box<T> {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        Ok(Box::new(T::deserialize(parcel)?))
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        self.as_ref().serialize(parcel)
    }
}

impl<T: Parcelable> Parcelable for Vec<T> {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        let len = parcel.read_i32()? as usize;
        let mut res = Vec::with_capacity(len);
        for _ in 0..len {
            res.push(T::deserialize(parcel)?);
        }
        Ok(res)
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_i32(self.len() as i32)?;
        for val in self {
            val.serialize(parcel)?;
        }
        Ok(())
    }
}

impl<K: Parcelable + Eq + Hash, V: Parcelable> Parcelable for HashMap<K, V> {
    fn deserialize(parcel: &mut Parcel) -> Result<Self> {
        let len = parcel.read_i32()?;
        let mut res = HashMap::new();
        for _ in 0..len {
            res.insert(K::deserialize(parcel)?, V::deserialize(parcel)?);
        }
        Ok(res)
    }
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_i32(self.len() as i32)?;
        for (k, v) in self {
            k.serialize(parcel)?;
            v.serialize(parcel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_of_u32_round_trips() {
        let mut p = Parcel::empty();
        let values: Vec<u32> = vec![1, 2, 3];
        values.serialize(&mut p).unwrap();
        p.set_position(0);
        let back = Vec::<u32>::deserialize(&mut p).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn option_round_trips_both_variants() {
        let mut p = Parcel::empty();
        Some(7u32).serialize(&mut p).unwrap();
        None::<u32>.serialize(&mut p).unwrap();
        p.set_position(0);
        assert_eq!(Option::<u32>::deserialize(&mut p).unwrap(), Some(7));
        assert_eq!(Option::<u32>::deserialize(&mut p).unwrap(), None);
    }

    #[test]
    fn hashmap_round_trips() {
        use std::collections::HashMap;
        let mut p = Parcel::empty();
        let mut map = HashMap::new();
        map.insert(1u32, "one".to_string());
        map.insert(2u32, "two".to_string());
        map.serialize(&mut p).unwrap();
        p.set_position(0);
        let back: HashMap<u32, String> = HashMap::deserialize(&mut p).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn string16_round_trips() {
        let mut p = Parcel::empty();
        String16("hi".to_string()).serialize(&mut p).unwrap();
        p.set_position(0);
        assert_eq!(String16::deserialize(&mut p).unwrap().0, "hi");
    }
}
