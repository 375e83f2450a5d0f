//! Layer 2: Canonical JSON encoder for content hashing.
//!
//! Canonical rules:
//! - object keys sorted by UTF-8 byte order, recursively
//! - no insignificant whitespace
//! - NaN/Infinity rejected
//!
//! The finiteness check runs before `Value` conversion: serde_json maps
//! non-finite floats to `null` during conversion, which would make NaN and
//! an explicit `null` hash identically.

use std::fmt;

use serde::Serialize;
use serde::ser::{
    SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant, SerializeTuple,
    SerializeTupleStruct, SerializeTupleVariant, Serializer,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonJsonError {
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("non-finite float values are not allowed")]
    NonFiniteFloat,
}

/// Serialize a value to canonical JSON bytes.
pub fn to_canon_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonJsonError> {
    ensure_finite(value)?;
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canon(&value, &mut out)?;
    Ok(out)
}

fn write_canon(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonJsonError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(&serde_json::to_vec(key)?);
                out.push(b':');
                write_canon(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canon(item, out)?;
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(&serde_json::to_vec(scalar)?),
    }
    Ok(())
}

fn ensure_finite<T: Serialize>(value: &T) -> Result<(), CanonJsonError> {
    value
        .serialize(FiniteProbe)
        .map_err(|_| CanonJsonError::NonFiniteFloat)
}

#[derive(Debug)]
struct NonFinite;

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("non-finite float")
    }
}

impl std::error::Error for NonFinite {}

impl serde::ser::Error for NonFinite {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        NonFinite
    }
}

/// Serializer that visits every float and errors on the first non-finite
/// one; everything else is accepted without producing output.
struct FiniteProbe;

macro_rules! finite_scalar {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _v: $ty) -> Result<(), NonFinite> {
                Ok(())
            }
        )*
    };
}

impl Serializer for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = FiniteProbe;
    type SerializeTuple = FiniteProbe;
    type SerializeTupleStruct = FiniteProbe;
    type SerializeTupleVariant = FiniteProbe;
    type SerializeMap = FiniteProbe;
    type SerializeStruct = FiniteProbe;
    type SerializeStructVariant = FiniteProbe;

    finite_scalar! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
    }

    fn serialize_f32(self, v: f32) -> Result<(), NonFinite> {
        if v.is_finite() { Ok(()) } else { Err(NonFinite) }
    }

    fn serialize_f64(self, v: f64) -> Result<(), NonFinite> {
        if v.is_finite() { Ok(()) } else { Err(NonFinite) }
    }

    fn serialize_none(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), NonFinite> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_tuple(self, _len: usize) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<FiniteProbe, NonFinite> {
        Ok(FiniteProbe)
    }
}

impl SerializeSeq for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeTuple for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeTupleStruct for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeTupleVariant for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeMap for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), NonFinite> {
        key.serialize(FiniteProbe)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeStruct for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}

impl SerializeStructVariant for FiniteProbe {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NonFinite> {
        value.serialize(FiniteProbe)
    }

    fn end(self) -> Result<(), NonFinite> {
        Ok(())
    }
}
