//! # Endian Normalization Module
//!
//! All multi-byte integers stored by the engine are little-endian on disk,
//! while codecs emit and consume payloads in the host's native byte order.
//! This module provides the normalization applied between the two: on
//! little-endian hosts it is the identity, and on big-endian hosts it swaps
//! bytes within each element of the payload.
//!
//! The element width matters. A fixed 4-byte integer payload is one 4-byte
//! element, but a UTF-16 string payload is a sequence of 2-byte elements
//! that must each be swapped individually rather than reversing the buffer
//! as a whole.

/* NORMALIZATION */

/// Rewrite `payload`, a sequence of `unit`-byte elements in native byte
/// order, into little-endian order. `payload.len()` must be a multiple of
/// `unit`.
pub fn to_little_endian(payload: &mut [u8], unit: usize) {
    debug_assert!(unit > 0 && payload.len() % unit == 0);
    if cfg!(target_endian = "big") {
        swap_units(payload, unit);
    }
}

/// Rewrite `payload`, a sequence of `unit`-byte little-endian elements,
/// into native byte order. The transformation is self-inverse, so this is
/// the same swap as [`to_little_endian`]; the two names mark the direction
/// of travel at call sites.
pub fn from_little_endian(payload: &mut [u8], unit: usize) {
    to_little_endian(payload, unit);
}

/// Reverse the bytes of each `unit`-sized element of `payload` in place.
fn swap_units(payload: &mut [u8], unit: usize) {
    for element in payload.chunks_exact_mut(unit) {
        element.reverse();
    }
}
