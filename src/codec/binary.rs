//! # Binary Codecs Module
//!
//! Codecs for opaque binary payloads: the fixed 16-byte UUID, the fixed
//! 16-byte big integer, and the flexible raw byte buffer. None of these are
//! endian-normalized; the UUID is defined in RFC 4122 byte order, and the
//! big integer and raw buffer store whatever bytes the host supplies,
//! verbatim.

use anyhow::Result;
use uuid::Uuid;

use crate::codec::{Codec, CodecKind, Value, reject};

/* UUID */

/// 16-byte UUID codec, stored verbatim in RFC 4122 byte order.
pub struct UuidCodec;

impl Codec for UuidCodec {
    fn name(&self) -> &'static str {
        "uuid"
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Fixed { bytes: 16 }
    }

    fn endian_sensitive(&self) -> bool {
        false
    }

    fn encode_fixed(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
            other => Err(reject(self, other)),
        }
    }

    fn decode_fixed(&self, payload: &[u8]) -> Result<Value> {
        let bytes: [u8; 16] = payload.try_into()?;
        Ok(Value::Uuid(Uuid::from_bytes(bytes)))
    }
}

/* BIG INTEGER */

/// 16-byte big-integer codec. The engine does not normalize this payload;
/// the host's own byte order is stored verbatim, so big-integer fields are
/// not portable across architectures unless a portable codec is
/// substituted.
pub struct BigIntCodec;

impl Codec for BigIntCodec {
    fn name(&self) -> &'static str {
        "big integer"
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Fixed { bytes: 16 }
    }

    fn endian_sensitive(&self) -> bool {
        false
    }

    fn encode_fixed(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::BigInt(raw) => Ok(raw.to_vec()),
            other => Err(reject(self, other)),
        }
    }

    fn decode_fixed(&self, payload: &[u8]) -> Result<Value> {
        Ok(Value::BigInt(payload.try_into()?))
    }
}

/* RAW BUFFER */

/// Flexible raw-buffer codec. Longer buffers are truncated to the declared
/// length and shorter ones are zero-padded; the decoder returns the full
/// declared length with no trimming, since trailing zeros may be data.
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn name(&self) -> &'static str {
        "byte buffer"
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
        match value {
            Value::Bytes(raw) => {
                let mut payload = raw.clone();
                payload.resize(length, 0);
                Ok(payload)
            },
            other => Err(reject(self, other)),
        }
    }

    fn decode_flexible(&self, payload: &[u8], length: usize) -> Result<Value> {
        debug_assert_eq!(payload.len(), length);
        Ok(Value::Bytes(payload.to_vec()))
    }
}
