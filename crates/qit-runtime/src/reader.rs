//! Host-side reconstruction of values from a generated program's binary
//! output stream (§4.8, §6 "Wire format").
//!
//! The wire format is schema-driven: there is no tag byte, so the reader
//! must be handed the same [`qit_ast::Type`] the generator declared for the
//! stream's element. Reading recurses the same way `write` does on the
//! native side: a composite value's encoding is the concatenation of its
//! children's encodings in declaration order.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use qit_ast::types::Type;

use crate::error::{ReadError, ReadResult};

/// A value decoded off the wire, shaped like [`qit_ast::HostValue`] but
/// without the `Expr`-construction type-checking (the type is already
/// known from the stream's schema).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Record(Vec<Value>),
    Sequence(Vec<Value>),
}

/// Reads one value of `ty` from `reader`.
///
/// Returns `Ok(None)` only on a clean end-of-stream at an element
/// boundary (zero bytes read where the *first* primitive of the value was
/// expected); any short read once a value has started decoding is
/// [`ReadError::IncompleteRecord`] (§6, §7).
pub fn read_value<R: Read>(reader: &mut R, ty: &Type) -> ReadResult<Option<Value>> {
    read_value_inner(reader, ty, true)
}

fn read_value_inner<R: Read>(
    reader: &mut R,
    ty: &Type,
    at_top_boundary: bool,
) -> ReadResult<Option<Value>> {
    match ty {
        Type::Int => match read_clean_eof_i32(reader, at_top_boundary)? {
            Some(i) => Ok(Some(Value::Int(i))),
            None => Ok(None),
        },
        Type::Range(_) => match read_clean_eof_i32(reader, at_top_boundary)? {
            Some(i) => Ok(Some(Value::Int(i))),
            None => Ok(None),
        },
        Type::Bool => {
            let mut byte = [0u8; 1];
            match read_exact_or_eof(reader, &mut byte, at_top_boundary)? {
                ReadOutcome::CleanEof => Ok(None),
                ReadOutcome::Filled => Ok(Some(Value::Bool(byte[0] != 0))),
            }
        }
        Type::Record(record) => {
            let mut fields = Vec::with_capacity(record.fields.len());
            for (i, (field_ty, _)) in record.fields.iter().enumerate() {
                // Only the record's first field may observe a clean EOF;
                // once any byte of the record has been read, running out
                // mid-way is IncompleteRecord (§4.1, §7).
                match read_value_inner(reader, field_ty, at_top_boundary && i == 0)? {
                    Some(v) => fields.push(v),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Record(fields)))
        }
        Type::Sequence(seq) => {
            let len = match read_clean_eof_i32(reader, at_top_boundary)? {
                Some(len) => len,
                None => return Ok(None),
            };
            let mut elements = Vec::with_capacity(len.max(0) as usize);
            for _ in 0..len {
                match read_value_inner(reader, &seq.element, false)? {
                    Some(v) => elements.push(v),
                    None => return Err(ReadError::IncompleteRecord),
                }
            }
            Ok(Some(Value::Sequence(elements)))
        }
        // A Values(T, ..) stream carries values of T on the wire — the
        // index is an iteration-order detail internal to the generated
        // iterator, not part of the encoding (§6).
        Type::Values(values) => read_value_inner(reader, &values.element, at_top_boundary),
    }
}

enum ReadOutcome {
    CleanEof,
    Filled,
}

fn read_exact_or_eof<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    allow_clean_eof: bool,
) -> ReadResult<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 && allow_clean_eof {
                return Ok(ReadOutcome::CleanEof);
            }
            return Err(ReadError::IncompleteRecord);
        }
        filled += n;
    }
    Ok(ReadOutcome::Filled)
}

fn read_clean_eof_i32<R: Read>(reader: &mut R, allow_clean_eof: bool) -> ReadResult<Option<i32>> {
    let mut buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut buf, allow_clean_eof)? {
        ReadOutcome::CleanEof => Ok(None),
        ReadOutcome::Filled => Ok(Some((&buf[..]).read_i32::<LittleEndian>()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_int_round_trip() {
        let bytes = 42i32.to_le_bytes();
        let mut cursor = &bytes[..];
        let value = read_value(&mut cursor, &Type::Int).unwrap().unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn clean_eof_at_element_boundary_yields_none() {
        let mut cursor: &[u8] = &[];
        let value = read_value(&mut cursor, &Type::Int).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn short_read_mid_element_is_incomplete_record() {
        let mut cursor: &[u8] = &[1, 2];
        let err = read_value(&mut cursor, &Type::Int).unwrap_err();
        assert!(matches!(err, ReadError::IncompleteRecord));
    }

    #[test]
    fn reads_bool() {
        let mut cursor: &[u8] = &[1];
        let value = read_value(&mut cursor, &Type::Bool).unwrap().unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn reads_record_field_wise() {
        let ty = Type::key_value(Type::Int, Type::Bool);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7i32.to_le_bytes());
        bytes.push(1);
        let mut cursor = &bytes[..];
        let value = read_value(&mut cursor, &ty).unwrap().unwrap();
        assert_eq!(
            value,
            Value::Record(vec![Value::Int(7), Value::Bool(true)])
        );
    }

    #[test]
    fn reads_sequence_with_length_prefix() {
        let ty = Type::sequence(Type::Int, None);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&10i32.to_le_bytes());
        bytes.extend_from_slice(&20i32.to_le_bytes());
        let mut cursor = &bytes[..];
        let value = read_value(&mut cursor, &ty).unwrap().unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![Value::Int(10), Value::Int(20)])
        );
    }

    #[test]
    fn empty_stream_of_records_yields_clean_eof() {
        let ty = Type::key_value(Type::Int, Type::Bool);
        let mut cursor: &[u8] = &[];
        let value = read_value(&mut cursor, &ty).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn partial_record_is_incomplete() {
        let ty = Type::key_value(Type::Int, Type::Bool);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7i32.to_le_bytes());
        // Missing the trailing bool byte.
        let mut cursor = &bytes[..];
        let err = read_value(&mut cursor, &ty).unwrap_err();
        assert!(matches!(err, ReadError::IncompleteRecord));
    }
}
