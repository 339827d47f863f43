//! # Text Codecs Module
//!
//! Flexible codecs for string payloads. The ASCII codec stores one byte per
//! element; the UTF-16 codec stores one 2-byte code unit per element and is
//! endian-sensitive, so the engine swaps its payload per code unit rather
//! than across the whole buffer. Both zero-pad up to the declared length
//! and trim trailing zero elements when decoding.

use anyhow::{Context, Result, bail};

use crate::codec::{Codec, CodecKind, Value, reject};
use crate::error::DatabaseError;

/* ASCII */

/// Flexible ASCII string codec, one byte per element.
pub struct AsciiCodec;

impl Codec for AsciiCodec {
    fn name(&self) -> &'static str {
        "ascii string"
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Flexible {
            bytes_per_element: 1,
        }
    }

    fn endian_sensitive(&self) -> bool {
        false
    }

    fn encode_flexible(&self, value: &Value, length: usize) -> Result<Vec<u8>> {
        let text = match value {
            Value::Ascii(s) => s,
            other => return Err(reject(self, other)),
        };

        if !text.is_ascii() {
            bail!(DatabaseError::UsageMismatch {
                codec: self.name(),
                hint: "it only stores ASCII text, but the value contained a \
                    character beyond 7 bits."
                    .into(),
            })
        }

        let mut payload = text.as_bytes().to_vec();
        payload.resize(length, 0);
        Ok(payload)
    }

    fn decode_flexible(&self, payload: &[u8], length: usize) -> Result<Value> {
        debug_assert_eq!(payload.len(), length);
        let end = payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);

        let text = &payload[..end];
        if let Some(byte) = text.iter().find(|b| !b.is_ascii()) {
            bail!(
                "ASCII payload contained the non-ASCII byte 0x{byte:02X}.",
            )
        }

        Ok(Value::Ascii(
            String::from_utf8_lossy(text).into_owned(),
        ))
    }
}

/* UTF-16 */

/// Flexible UTF-16 string codec, one 2-byte code unit per element.
///
/// Truncation to the declared length happens at code-unit granularity, the
/// same way the on-disk format measures the field.
pub struct Utf16Codec;

impl Codec for Utf16Codec {
    fn name(&self) -> &'static str {
        "utf-16 string"
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Flexible {
            bytes_per_element: 2,
        }
    }

    fn endian_sensitive(&self) -> bool {
        true
    }

    fn encode_flexible(&self, value: &Value, length: usize) -> Result<Vec<u8>> {
        let text = match value {
            Value::Utf16(s) => s,
            other => return Err(reject(self, other)),
        };

        let elements = length / 2;
        let mut units: Vec<u16> = text.encode_utf16().collect();
        units.resize(elements, 0);

        let mut payload = Vec::with_capacity(length);
        for unit in units {
            payload.extend_from_slice(&unit.to_ne_bytes());
        }

        Ok(payload)
    }

    fn decode_flexible(&self, payload: &[u8], length: usize) -> Result<Value> {
        debug_assert_eq!(payload.len(), length);
        let mut units: Vec<u16> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect();

        let end = units
            .iter()
            .rposition(|&u| u != 0)
            .map_or(0, |i| i + 1);
        units.truncate(end);

        let text = String::from_utf16(&units)
            .context("UTF-16 payload held an unpaired surrogate.")?;

        Ok(Value::Utf16(text))
    }
}
