//! The tagged field value and its deterministic binary encoding.
//!
//! A stored record's payload is a length-prefixed list of [`Field`]s. The
//! encoding is a simple tag-value stream (spec.md §6 recommends this shape):
//! identical logical values always produce identical bytes, so two records
//! built from the same fields are byte-for-byte equal.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::oid::Oid;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_BYTES: u8 = 3;
const TAG_OID: u8 = 4;

/// A single field value: either a primitive or an [`Oid`] reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Null,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Oid(Oid),
}

impl Field {
    pub fn is_oid(&self) -> bool {
        matches!(self, Field::Oid(_))
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Field::Oid(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Field::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_str(r: &mut impl Read) -> Result<Arc<str>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Arc::from)
        .map_err(|e| Error::Corrupt(format!("non-utf8 string field: {e}")))
}

fn encode_one(w: &mut impl Write, field: &Field) -> io::Result<()> {
    match field {
        Field::Null => w.write_u8(TAG_NULL),
        Field::Bool(b) => {
            w.write_u8(TAG_BOOL)?;
            w.write_u8(if *b { 1 } else { 0 })
        }
        Field::Int(i) => {
            w.write_u8(TAG_INT)?;
            w.write_i64::<LittleEndian>(*i)
        }
        Field::Bytes(b) => {
            w.write_u8(TAG_BYTES)?;
            w.write_u32::<LittleEndian>(b.len() as u32)?;
            w.write_all(b)
        }
        Field::Oid(o) => {
            w.write_u8(TAG_OID)?;
            if o.is_null() {
                w.write_u8(0)
            } else {
                w.write_u8(1)?;
                w.write_u64::<LittleEndian>(o.seq())?;
                w.write_u64::<LittleEndian>(o.size())?;
                write_str(w, o.pool_id())?;
                write_str(w, o.type_name())
            }
        }
    }
}

fn decode_one(r: &mut impl Read) -> Result<Field> {
    let tag = r.read_u8()?;
    match tag {
        TAG_NULL => Ok(Field::Null),
        TAG_BOOL => Ok(Field::Bool(r.read_u8()? != 0)),
        TAG_INT => Ok(Field::Int(r.read_i64::<LittleEndian>()?)),
        TAG_BYTES => {
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            Ok(Field::Bytes(buf))
        }
        TAG_OID => {
            let present = r.read_u8()?;
            if present == 0 {
                Ok(Field::Oid(Oid::null()))
            } else {
                let seq = r.read_u64::<LittleEndian>()?;
                let size = r.read_u64::<LittleEndian>()?;
                let pool_id = read_str(r)?;
                let type_name = read_str(r)?;
                Ok(Field::Oid(Oid::new(seq, size, pool_id, type_name)))
            }
        }
        other => Err(Error::Corrupt(format!("unknown field tag {other}"))),
    }
}

/// Serialize a field list deterministically: `[count:u32][field...]`.
pub fn encode_field_list(fields: &[Field]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(fields.len() as u32)
        .expect("write to Vec never fails");
    for f in fields {
        encode_one(&mut buf, f).expect("write to Vec never fails");
    }
    buf
}

/// Inverse of [`encode_field_list`]. Trailing zero padding bytes (beyond the
/// encoded field list) are ignored, as records are right-padded to the
/// pool's slot size.
pub fn decode_field_list(bytes: &[u8]) -> Result<Vec<Field>> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(decode_one(&mut cursor)?);
    }
    Ok(fields)
}
