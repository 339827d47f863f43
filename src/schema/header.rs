//! # Header Encoding Module
//!
//! The byte-exact encoding of a schema at the front of its record file.
//! All multi-byte integers are little-endian, and every length is stored
//! minus one so that the full 1-to-65536 ranges fit their fixed widths:
//!
//! ```none
//! off 0x00 : u16_le  field_count - 1
//! off 0x02 : field_header[0]
//!            ...
//!            field_header[field_count - 1]
//!
//! field_header := u8 (name_len - 1) || name_len bytes ASCII name
//!              || u16_le (payload_len - 1)
//! ```

use anyhow::{Result, bail};

use std::io::{ErrorKind, Read};

use crate::error::DatabaseError;
use crate::schema::Schema;

/* DEFINITIONS */

/// One field as parsed back out of an on-disk header: the (name, length)
/// pair without any codec binding. The disk order of these is the
/// authoritative slot layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    /// ASCII field name.
    pub name: String,

    /// Payload byte length.
    pub length: usize,
}

/* ENCODING */

/// Encode the file header described by `schema`, in declared field order.
pub fn encode(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::with_capacity(schema.header_size() as usize);
    let count = schema.field_count() as u64 - 1;
    out.extend_from_slice(&(count as u16).to_le_bytes());

    for field in schema.fields() {
        out.push((field.name().len() - 1) as u8);
        out.extend_from_slice(field.name().as_bytes());
        out.extend_from_slice(&((field.length() - 1) as u16).to_le_bytes());
    }

    out
}

/// Return the byte size of the header a schema with the given field name
/// lengths encodes to.
pub fn size_of<I>(name_lengths: I) -> u64
where
    I: Iterator<Item = usize>,
{
    2 + name_lengths
        .map(|len| 3 + len as u64)
        .sum::<u64>()
}

/* DECODING */

/// Parse the header at the front of `reader` into its raw field list, in
/// disk order. `table` names the record type for error reporting.
pub fn decode<R: Read>(table: &str, reader: &mut R) -> Result<Vec<RawField>> {
    let mut count_bytes = [0u8; 2];
    read_header_bytes(table, reader, &mut count_bytes)?;
    let count = u16::from_le_bytes(count_bytes) as usize + 1;

    let mut fields = Vec::with_capacity(count);
    for index in 0..count {
        let mut name_length = [0u8; 1];
        read_header_bytes(table, reader, &mut name_length)?;

        let mut name = vec![0u8; name_length[0] as usize + 1];
        read_header_bytes(table, reader, &mut name)?;
        if !name.is_ascii() {
            bail!(DatabaseError::Corruption {
                table: table.into(),
                hint: format!(
                    "the name of field {index} contains non-ASCII bytes.",
                ),
            })
        }

        let mut length_bytes = [0u8; 2];
        read_header_bytes(table, reader, &mut length_bytes)?;

        fields.push(RawField {
            name: String::from_utf8(name)?,
            length: u16::from_le_bytes(length_bytes) as usize + 1,
        });
    }

    Ok(fields)
}

/// Fill `buf` from `reader`, reporting a truncated header as corruption
/// rather than a bare end-of-file.
fn read_header_bytes<R: Read>(
    table: &str,
    reader: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            bail!(DatabaseError::Corruption {
                table: table.into(),
                hint: "the file ends in the middle of its header.".into(),
            })
        },
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::codec;
    use crate::schema::{Field, SchemaBuilder};

    fn sample() -> Schema {
        SchemaBuilder::new()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .add(Field::flexible("bb", &codec::ASCII, 8).unwrap())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn encoding_matches_the_documented_layout() {
        let bytes = encode(&sample());
        assert_eq!(
            bytes,
            [
                0x01, 0x00, // two fields
                0x00, 0x61, 0x03, 0x00, // "a", 4 bytes
                0x01, 0x62, 0x62, 0x07, 0x00, // "bb", 8 bytes
            ]
        );
        assert_eq!(bytes.len() as u64, sample().header_size());
    }

    #[test]
    fn headers_parse_back_to_the_schema_they_encode() {
        let schema = sample();
        let bytes = encode(&schema);
        let fields = decode("sample", &mut bytes.as_slice()).unwrap();

        assert_eq!(
            fields,
            vec![
                RawField {
                    name: "a".into(),
                    length: 4
                },
                RawField {
                    name: "bb".into(),
                    length: 8
                },
            ]
        );
    }

    #[test]
    fn truncated_headers_read_as_corruption() {
        let bytes = encode(&sample());
        for cut in [0, 1, 3, bytes.len() - 1] {
            let result = decode("sample", &mut &bytes[..cut]);
            assert!(result.is_err());
        }
    }

    #[test]
    fn extreme_lengths_survive_the_minus_one_encoding() {
        let schema = SchemaBuilder::new()
            .add(
                Field::flexible(
                    &"n".repeat(256),
                    &codec::BYTES,
                    65536,
                )
                .unwrap(),
            )
            .unwrap()
            .build()
            .unwrap();

        let bytes = encode(&schema);
        assert_eq!(bytes[2], 0xFF);
        assert_eq!(&bytes[259..261], &[0xFF, 0xFF]);

        let fields = decode("wide", &mut bytes.as_slice()).unwrap();
        assert_eq!(fields[0].name.len(), 256);
        assert_eq!(fields[0].length, 65536);
    }
}
