//! # Codec Module
//!
//! This module translates typed values to and from the byte payloads stored
//! inside record slots. A codec is either *fixed*, emitting and consuming a
//! payload of a byte length that is a constant of the codec, or *flexible*,
//! emitting and consuming a payload whose length is declared per-field in
//! the schema as an element count.
//!
//! Codecs work in the host's native byte order; the engine normalizes
//! endian-sensitive payloads to little-endian on the way to disk and back
//! (see [`endian`]). Each codec therefore reports its element width so that
//! normalization swaps at the right granularity.

use anyhow::{Result, bail};
use uuid::Uuid;

use crate::error::DatabaseError;

/* UTILITY MODULES */

pub mod endian;

/* IMPLEMENTATION MODULES */

mod binary;
mod primitive;
mod text;

pub use binary::{BigIntCodec, BytesCodec, UuidCodec};
pub use primitive::{BoolCodec, FloatCodec, IntCodec};
pub use text::{AsciiCodec, Utf16Codec};

/* CONSTANTS */

/// The maximum payload byte length any codec may report or emit.
pub const MAX_PAYLOAD_SIZE: usize = 65536;

/* DEFAULT CODECS */

/// 1-byte boolean, stored as `0x00`/`0xFF` with a majority-vote decoder.
pub static BOOL: BoolCodec = BoolCodec;

/// Unsigned 8-bit integer.
pub static UINT8: IntCodec = IntCodec::new("uint8", 1, false);
/// Unsigned 16-bit integer.
pub static UINT16: IntCodec = IntCodec::new("uint16", 2, false);
/// Unsigned 32-bit integer.
pub static UINT32: IntCodec = IntCodec::new("uint32", 4, false);
/// Unsigned 64-bit integer.
pub static UINT64: IntCodec = IntCodec::new("uint64", 8, false);

/// Signed 8-bit integer.
pub static INT8: IntCodec = IntCodec::new("int8", 1, true);
/// Signed 16-bit integer.
pub static INT16: IntCodec = IntCodec::new("int16", 2, true);
/// Signed 32-bit integer.
pub static INT32: IntCodec = IntCodec::new("int32", 4, true);
/// Signed 64-bit integer.
pub static INT64: IntCodec = IntCodec::new("int64", 8, true);

/// IEEE 754 binary16 float, carried as [`Value::F32`] in memory.
pub static F16: FloatCodec = FloatCodec::new("float16", 2);
/// IEEE 754 binary32 float.
pub static F32: FloatCodec = FloatCodec::new("float32", 4);
/// IEEE 754 binary64 float.
pub static F64: FloatCodec = FloatCodec::new("float64", 8);

/// 16-byte UUID, stored verbatim in RFC 4122 byte order.
pub static UUID: UuidCodec = UuidCodec;

/// 16-byte big integer, stored verbatim with no endian normalization.
pub static BIG_INT: BigIntCodec = BigIntCodec;

/// ASCII string, one byte per element, zero-padded to the declared length.
pub static ASCII: AsciiCodec = AsciiCodec;

/// UTF-16 string, two bytes per element, zero-padded to the declared length.
pub static UTF16: Utf16Codec = Utf16Codec;

/// Raw byte buffer, stored verbatim with no endian normalization.
pub static BYTES: BytesCodec = BytesCodec;

/* DEFINITIONS */

/// Distinguishes codecs whose payload length is a constant of the codec
/// from codecs whose payload length is declared per-field in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// The codec always emits and consumes exactly `bytes` bytes.
    Fixed {
        /// Payload byte length, a constant of the codec.
        bytes: usize,
    },

    /// The codec emits and consumes a schema-declared number of elements,
    /// each `bytes_per_element` bytes wide.
    Flexible {
        /// Width of one element; multiplied by the schema-declared element
        /// count to yield the payload byte length.
        bytes_per_element: usize,
    },
}

/// A decoded field value. The engine moves values through scans and slot
/// writes as instances of this tagged union, avoiding boxed indirection on
/// the hot path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean, stored in one byte.
    Bool(bool),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer. Also the type of slot ids in projections.
    U64(u64),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Floating point, stored as binary16 or binary32 depending on codec.
    F32(f32),
    /// Double-precision floating point.
    F64(f64),
    /// 16-byte UUID.
    Uuid(Uuid),
    /// 16-byte big integer, kept as raw bytes in the host's own order.
    BigInt([u8; 16]),
    /// ASCII string.
    Ascii(String),
    /// UTF-16 string (carried as UTF-8 in memory).
    Utf16(String),
    /// Raw byte buffer.
    Bytes(Vec<u8>),
}

/* CODEC INTERFACE */

/// The pair of translations between a typed [`Value`] and its byte payload.
///
/// Fixed codecs implement [`Codec::encode_fixed`] and [`Codec::decode_fixed`];
/// flexible codecs implement [`Codec::encode_flexible`] and
/// [`Codec::decode_flexible`]. Driving a codec through the entry points of
/// the other kind fails with [`DatabaseError::UsageMismatch`], which the
/// unimplemented defaults provide.
pub trait Codec: Send + Sync {
    /// A short name for this codec, for error reporting purposes.
    fn name(&self) -> &'static str;

    /// Whether the payload length is fixed by the codec or declared in the
    /// schema, along with the relevant byte width.
    fn kind(&self) -> CodecKind;

    /// True if payloads of this codec must be normalized to little-endian
    /// on disk. The normalization element width is the fixed byte count or
    /// the bytes-per-element of the codec's kind.
    fn endian_sensitive(&self) -> bool;

    /// Translate `value` into exactly the codec's fixed byte count, in
    /// native byte order.
    fn encode_fixed(&self, value: &Value) -> Result<Vec<u8>> {
        let _ = value;
        bail!(DatabaseError::UsageMismatch {
            codec: self.name(),
            hint: "this codec declares a schema-driven payload length, but \
                it was driven through the fixed-length entry point."
                .into(),
        })
    }

    /// Translate a native-order payload of the codec's fixed byte count
    /// back into a [`Value`].
    fn decode_fixed(&self, payload: &[u8]) -> Result<Value> {
        let _ = payload;
        bail!(DatabaseError::UsageMismatch {
            codec: self.name(),
            hint: "this codec declares a schema-driven payload length, but \
                it was driven through the fixed-length entry point."
                .into(),
        })
    }

    /// Translate `value` into exactly `length` bytes in native byte order,
    /// truncating or zero-padding the natural encoding as needed. `length`
    /// is the schema-declared element count multiplied by the codec's
    /// bytes-per-element.
    fn encode_flexible(&self, value: &Value, length: usize) -> Result<Vec<u8>> {
        let _ = (value, length);
        bail!(DatabaseError::UsageMismatch {
            codec: self.name(),
            hint: "this codec has a fixed payload length, but it was driven \
                through the schema-driven entry point."
                .into(),
        })
    }

    /// Translate a native-order payload of `length` bytes back into a
    /// [`Value`].
    fn decode_flexible(&self, payload: &[u8], length: usize) -> Result<Value> {
        let _ = (payload, length);
        bail!(DatabaseError::UsageMismatch {
            codec: self.name(),
            hint: "this codec has a fixed payload length, but it was driven \
                through the schema-driven entry point."
                .into(),
        })
    }
}

/* PIPELINES */

/// Write pipeline: translate `value` through `codec` into a payload of
/// exactly `length` bytes, normalized to little-endian if the codec is
/// endian-sensitive. `length` must agree with the codec's kind; for fixed
/// codecs it is the codec's own byte count.
pub fn encode_payload(
    codec: &dyn Codec,
    value: &Value,
    length: usize,
) -> Result<Vec<u8>> {
    let (mut payload, unit) = match codec.kind() {
        CodecKind::Fixed { bytes } => {
            debug_assert_eq!(bytes, length);
            (codec.encode_fixed(value)?, bytes)
        },
        CodecKind::Flexible { bytes_per_element } => {
            (codec.encode_flexible(value, length)?, bytes_per_element)
        },
    };

    debug_assert_eq!(payload.len(), length);
    if codec.endian_sensitive() {
        endian::to_little_endian(&mut payload, unit);
    }

    Ok(payload)
}

/// Read pipeline: translate a little-endian on-disk `payload` back into a
/// [`Value`] through `codec`.
pub fn decode_payload(codec: &dyn Codec, payload: &[u8]) -> Result<Value> {
    let mut native = payload.to_vec();
    match codec.kind() {
        CodecKind::Fixed { bytes } => {
            if codec.endian_sensitive() {
                endian::from_little_endian(&mut native, bytes);
            }
            codec.decode_fixed(&native)
        },
        CodecKind::Flexible { bytes_per_element } => {
            if codec.endian_sensitive() {
                endian::from_little_endian(&mut native, bytes_per_element);
            }
            codec.decode_flexible(&native, native.len())
        },
    }
}

/* VALUE IMPLEMENTATION */

impl Value {
    /// A short name for the variant held by this value, for error reporting
    /// purposes.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Uuid(_) => "uuid",
            Self::BigInt(_) => "big integer",
            Self::Ascii(_) => "ascii string",
            Self::Utf16(_) => "utf-16 string",
            Self::Bytes(_) => "byte buffer",
        }
    }

    /// Returns the contained boolean, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the contained unsigned integer widened to 64 bits, if this
    /// is an unsigned integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(*v as u64),
            Self::U16(v) => Some(*v as u64),
            Self::U32(v) => Some(*v as u64),
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the contained signed integer widened to 64 bits, if this is
    /// a signed integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(v) => Some(*v as i64),
            Self::I16(v) => Some(*v as i64),
            Self::I32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the contained float widened to 64 bits, if this is a
    /// floating-point value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the contained string, if this is an ASCII or UTF-16 value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) | Self::Utf16(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the contained raw buffer, if this is a byte-buffer value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the contained UUID, if this is a UUID value.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl CodecKind {
    /// True for codecs whose payload length is a constant of the codec.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }

    /// The normalization element width of this kind: the fixed byte count,
    /// or the width of one flexible element.
    pub fn unit(&self) -> usize {
        match self {
            Self::Fixed { bytes } => *bytes,
            Self::Flexible { bytes_per_element } => *bytes_per_element,
        }
    }
}

/// Raise a [`DatabaseError::UsageMismatch`] for a codec handed a value of a
/// variant it does not translate.
pub(crate) fn reject(codec: &dyn Codec, value: &Value) -> anyhow::Error {
    DatabaseError::UsageMismatch {
        codec: codec.name(),
        hint: format!(
            "it does not translate values of type '{}'.",
            value.kind_name(),
        ),
    }
    .into()
}
