//! Purpose: Serialize a `DecodedValue` tree as a protocol 2 pickle stream.
//! Exports: `encode`.
//! Role: Native-side writer used to build fixtures and graphite batches.
//! Invariants: Only JSON-representable shapes plus bytes/tuples are written; others are rejected.
use crate::core::error::{Error, ErrorKind};
use crate::core::pickle::opcode as op;
use crate::core::value::DecodedValue;

pub fn encode(value: &DecodedValue) -> Result<Vec<u8>, Error> {
    let mut out = vec![op::PROTO, 2];
    write_value(value, &mut out)?;
    out.push(op::STOP);
    Ok(out)
}

fn write_value(value: &DecodedValue, out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        DecodedValue::Null => out.push(op::NONE),
        DecodedValue::Bool(true) => out.push(op::NEWTRUE),
        DecodedValue::Bool(false) => out.push(op::NEWFALSE),
        DecodedValue::Int(value) => write_int(*value, out),
        DecodedValue::Float(value) => {
            out.push(op::BINFLOAT);
            out.extend_from_slice(&value.to_be_bytes());
        }
        DecodedValue::Str(text) => {
            out.push(op::BINUNICODE);
            out.extend_from_slice(&u32_len(text.len())?.to_le_bytes());
            out.extend_from_slice(text.as_bytes());
        }
        DecodedValue::Bytes(bytes) => match u8::try_from(bytes.len()) {
            Ok(len) => {
                out.push(op::SHORT_BINSTRING);
                out.push(len);
                out.extend_from_slice(bytes);
            }
            Err(_) => {
                let len = i32::try_from(bytes.len()).map_err(|_| too_long(bytes.len()))?;
                out.push(op::BINSTRING);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(bytes);
            }
        },
        DecodedValue::List(items) => {
            out.push(op::EMPTY_LIST);
            if !items.is_empty() {
                out.push(op::MARK);
                for item in items {
                    write_value(item, out)?;
                }
                out.push(op::APPENDS);
            }
        }
        DecodedValue::Tuple(items) => {
            if items.is_empty() {
                out.push(op::EMPTY_TUPLE);
                return Ok(());
            }
            let short = match items.len() {
                1 => Some(op::TUPLE1),
                2 => Some(op::TUPLE2),
                3 => Some(op::TUPLE3),
                _ => None,
            };
            if short.is_none() {
                out.push(op::MARK);
            }
            for item in items {
                write_value(item, out)?;
            }
            out.push(short.unwrap_or(op::TUPLE));
        }
        DecodedValue::Dict(pairs) => {
            out.push(op::EMPTY_DICT);
            if !pairs.is_empty() {
                out.push(op::MARK);
                for (key, value) in pairs {
                    write_value(key, out)?;
                    write_value(value, out)?;
                }
                out.push(op::SETITEMS);
            }
        }
        DecodedValue::BigInt(_) | DecodedValue::Set { .. } | DecodedValue::Object { .. } => {
            return Err(Error::new(ErrorKind::UnsupportedType)
                .with_message(format!("cannot pickle {}", value.type_name())));
        }
    }
    Ok(())
}

fn write_int(value: i128, out: &mut Vec<u8>) {
    if let Ok(small) = u8::try_from(value) {
        out.push(op::BININT1);
        out.push(small);
    } else if let Ok(short) = u16::try_from(value) {
        out.push(op::BININT2);
        out.extend_from_slice(&short.to_le_bytes());
    } else if let Ok(word) = i32::try_from(value) {
        out.push(op::BININT);
        out.extend_from_slice(&word.to_le_bytes());
    } else {
        let bytes = value.to_le_bytes();
        let negative = value < 0;
        let fill = if negative { 0xff } else { 0x00 };
        let mut len = bytes.len();
        while len > 1 && bytes[len - 1] == fill && ((bytes[len - 2] & 0x80 != 0) == negative) {
            len -= 1;
        }
        out.push(op::LONG1);
        out.push(len as u8);
        out.extend_from_slice(&bytes[..len]);
    }
}

fn u32_len(len: usize) -> Result<u32, Error> {
    u32::try_from(len).map_err(|_| too_long(len))
}

fn too_long(len: usize) -> Error {
    Error::new(ErrorKind::Usage).with_message(format!("{len} byte string is too long to pickle"))
}
