//! # Scan Engine Module
//!
//! Linear evaluation of predicates over the slots of a record file. A scan
//! walks a contiguous range of slots, skips tombstones, decodes only the
//! projected fields, and hands each projection to a caller-supplied
//! predicate. Parallel scans split the slot range into one contiguous
//! segment per worker and run the same walk on each.
//!
//! Cancellation is cooperative: a shared token is checked between slots,
//! so a worker that has begun decoding a slot finishes it, and results
//! gathered before the cancellation are kept.

use anyhow::{Result, bail};

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::{self, Codec, Value};
use crate::db::Record;
use crate::error::DatabaseError;
use crate::store::{BoundField, DELETED};

/* DEFINITIONS */

/// Shared cancellation flag for one scan. Cloning shares the flag. A
/// predicate may cancel the scan it is running inside; other workers of a
/// parallel scan observe the flag best-effort and may each finish the slot
/// they are on before stopping.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

/// One projected field of a scan, resolved from its name to the precomputed
/// geometry needed to slice it out of a slot buffer.
#[derive(Clone)]
pub(crate) struct Column {
    /// Byte offset of the payload within the slot. The first payload sits
    /// at offset 1, just past the options byte.
    pub offset: usize,

    /// Payload byte length.
    pub length: usize,

    /// Codec decoding the payload.
    pub codec: &'static dyn Codec,
}

/// The geometry of one contiguous scan range over a record file. Workers of
/// a parallel scan each receive their own segment.
#[derive(Clone)]
pub(crate) struct Segment {
    /// Record type name, for error reporting.
    pub table: String,

    /// Path of the record file.
    pub path: PathBuf,

    /// Byte size of the file header.
    pub header_size: u64,

    /// Byte size of one slot.
    pub slot_size: u64,

    /// First slot id of the range.
    pub start: u64,

    /// Number of slots in the range.
    pub slots: u64,
}

/* CANCELLATION */

impl CancelToken {
    /// Returns a new, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the scan sharing this token to stop after its current slot.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/* PARTITIONING */

/// Split `instances` slots into `threads` contiguous ranges of
/// `(first slot id, slot count)`. All but the last range hold exactly
/// `instances / threads` slots; the last absorbs the remainder.
pub(crate) fn partitions(instances: u64, threads: usize) -> Vec<(u64, u64)> {
    debug_assert!(threads > 0);
    let threads = threads as u64;
    let base = instances / threads;

    let mut out = Vec::with_capacity(threads as usize);
    for index in 0..threads - 1 {
        out.push((base * index, base));
    }

    let last = if instances % threads == 0 {
        base
    } else {
        instances - base * (threads - 1)
    };
    out.push((base * (threads - 1), last));

    out
}

/* SLOT WALK */

/// Walk the live slots of `segment`, invoking `visit` with each slot id and
/// its payload bytes (everything past the options byte). Stops early when
/// `cancel` is set or `visit` returns false.
fn walk<F>(segment: &Segment, cancel: &CancelToken, mut visit: F) -> Result<()>
where
    F: FnMut(u64, &[u8]) -> Result<bool>,
{
    if segment.slots == 0 {
        return Ok(());
    }

    let file = File::open(&segment.path)?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(
        segment.header_size + segment.start * segment.slot_size,
    ))?;

    let payload_size = (segment.slot_size - 1) as usize;
    let mut payload = vec![0u8; payload_size];
    let mut options = [0u8; 1];

    for id in segment.start..segment.start + segment.slots {
        if cancel.is_cancelled() {
            break;
        }

        read_slot_bytes(segment, &mut reader, &mut options)?;
        if options[0] & DELETED != 0 {
            reader.seek_relative(payload_size as i64)?;
            continue;
        }

        read_slot_bytes(segment, &mut reader, &mut payload)?;
        if !visit(id, &payload)? {
            break;
        }
    }

    Ok(())
}

/// Fill `buf` from `reader`, reporting a truncated slot as corruption.
fn read_slot_bytes<R: Read>(
    segment: &Segment,
    reader: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            bail!(DatabaseError::Corruption {
                table: segment.table.clone(),
                hint: "the file ends in the middle of a slot.".into(),
            })
        },
        Err(e) => Err(e.into()),
    }
}

/* SCAN SHAPES */

/// Decode the projection `[slot id, column values...]` for one slot.
fn project(id: u64, payload: &[u8], columns: &[Column]) -> Result<Vec<Value>> {
    let mut row = Vec::with_capacity(columns.len() + 1);
    row.push(Value::U64(id));
    for column in columns {
        let begin = column.offset - 1;
        let bytes = &payload[begin..begin + column.length];
        row.push(codec::decode_payload(column.codec, bytes)?);
    }

    Ok(row)
}

/// Fetch: collect the projection of every live slot satisfying `pred`.
pub(crate) fn fetch(
    segment: &Segment,
    columns: &[Column],
    pred: &dyn Fn(&[Value], &CancelToken) -> bool,
    cancel: &CancelToken,
) -> Result<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    walk(segment, cancel, |id, payload| {
        let row = project(id, payload, columns)?;
        if pred(&row, cancel) {
            rows.push(row);
        }

        Ok(true)
    })?;

    Ok(rows)
}

/// Count: tally the live slots satisfying `pred` without collecting them.
pub(crate) fn count(
    segment: &Segment,
    columns: &[Column],
    pred: &dyn Fn(&[Value], &CancelToken) -> bool,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut total = 0;
    walk(segment, cancel, |id, payload| {
        let row = project(id, payload, columns)?;
        if pred(&row, cancel) {
            total += 1;
        }

        Ok(true)
    })?;

    Ok(total)
}

/// Fetch-full: materialize every field of each live slot into a host
/// record and collect the records satisfying `pred`.
pub(crate) fn fetch_full<T: Record>(
    segment: &Segment,
    fields: &[BoundField],
    pred: &dyn Fn(&T, &CancelToken) -> bool,
    cancel: &CancelToken,
) -> Result<Vec<T>> {
    let mut records = Vec::new();
    walk(segment, cancel, |_, payload| {
        let mut values = vec![Value::Bool(false); fields.len()];
        for bound in fields {
            let begin = bound.offset - 1;
            let bytes = &payload[begin..begin + bound.field.length()];
            let value = codec::decode_payload(bound.field.codec(), bytes)?;
            values[bound.source] = value;
        }

        let record = T::from_values(values)?;
        if pred(&record, cancel) {
            records.push(record);
        }

        Ok(true)
    })?;

    Ok(records)
}
