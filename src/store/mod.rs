//! # Store Module
//!
//! The on-disk engine for one record type. A store binds a schema to a
//! single fixed-record file: a header describing the field layout followed
//! by a contiguous array of equally-sized slots, each holding one options
//! byte and the concatenated field payloads in header order.
//!
//! Slots are appended at the end of the file or recycled out of a FIFO
//! queue of tombstoned ids. Tombstoning only sets a bit; the bytes stay in
//! place until the slot is recycled, scrubbed ([`Store::purge_keep`]) or
//! compacted away ([`Store::purge`]).

use anyhow::{Context, Result, bail};
use log::{debug, info};

use std::collections::{HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::codec::{self, Value};
use crate::db::Record;
use crate::error::DatabaseError;
use crate::schema::header::{self, RawField};
use crate::schema::{Field, Schema};
use crate::store::lock::{AccessLock, ReadGuard};
use crate::store::scan::{CancelToken, Column, Segment};
use crate::util;

/* UTILITY MODULES */

pub mod lock;
pub mod scan;

/* IMPLEMENTATION MODULES */

mod upgrade;

/* CONSTANTS */

/// Options-byte bit marking a slot as deleted. The remaining bits are
/// reserved and must be written as zero but never interpreted.
pub(crate) const DELETED: u8 = 0x01;

/* DEFINITIONS */

/// The runtime state of one record type: its schema bound to the layout of
/// its record file, the recyclable-slot queue, and the access lock
/// coordinating readers with the single writer.
#[derive(Debug)]
pub struct Store {
    table: String,
    path: PathBuf,
    schema: Schema,
    fields: Vec<BoundField>,
    header_size: u64,
    slot_size: u64,
    free: Mutex<FreeQueue>,
    lock: Arc<AccessLock>,
}

/// One schema field bound to its place in the slot layout. The collection
/// of these is kept in disk order, which is the single source of truth for
/// slot layout; `source` remembers where the field sits in declared order.
#[derive(Debug)]
pub(crate) struct BoundField {
    /// The field descriptor.
    pub field: Field,

    /// Byte offset of the payload within the slot; the first payload sits
    /// at offset 1, past the options byte.
    pub offset: usize,

    /// Index of this field in the schema's declared order.
    pub source: usize,
}

/// FIFO of recyclable tombstoned slot ids. A companion set keeps ids
/// unique, so freeing a slot twice cannot hand the same id out twice.
#[derive(Default, Debug)]
struct FreeQueue {
    queue: VecDeque<u64>,
    queued: HashSet<u64>,
}

impl FreeQueue {
    fn enqueue(&mut self, id: u64) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn dequeue(&mut self) -> Option<u64> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/* REGISTRATION */

impl Store {
    /// Bind `schema` to the record file for `table` under `directory`,
    /// creating the file if it does not exist.
    ///
    /// When the file exists, its header is parsed and compared with the
    /// schema by (name, length) set equality; the on-disk field order then
    /// becomes the slot layout regardless of declared order. A mismatch
    /// fails with [`DatabaseError::HeaderMismatch`] unless `upgrade` is
    /// true, in which case the file is migrated in place: payloads of
    /// fields present in both layouts are carried over, new fields are
    /// zero-filled, dropped fields and tombstoned slots are discarded.
    pub fn open(
        table: &str,
        schema: Schema,
        directory: &Path,
        upgrade: bool,
    ) -> Result<Self> {
        let path = directory.join(util::file_name(table));
        let disk = if path.exists() {
            let file = File::open(&path).with_context(|| {
                format!("Failed to open record file {:?}.", path)
            })?;

            let on_disk = header::decode(table, &mut BufReader::new(file))?;
            match layout_of(&schema, &on_disk) {
                Some(_) => on_disk,
                None if upgrade => {
                    upgrade::migrate(table, &path, &on_disk, &schema)?;
                    declared_layout(&schema)
                },
                None => {
                    bail!(DatabaseError::HeaderMismatch {
                        table: table.into(),
                        hint: mismatch_hint(&schema, &on_disk),
                    })
                },
            }
        } else {
            let file = File::create(&path).with_context(|| {
                format!("Failed to create record file {:?}.", path)
            })?;

            let mut writer = BufWriter::new(file);
            writer.write_all(&header::encode(&schema))?;
            writer.flush()?;
            declared_layout(&schema)
        };

        let order = layout_of(&schema, &disk).ok_or_else(|| {
            DatabaseError::HeaderMismatch {
                table: table.into(),
                hint: mismatch_hint(&schema, &disk),
            }
        })?;

        let mut fields = Vec::with_capacity(disk.len());
        let mut offset = 1;
        for source in order {
            let field = schema.fields()[source].clone();
            let length = field.length();
            fields.push(BoundField {
                field,
                offset,
                source,
            });
            offset += length;
        }

        let store = Self {
            table: table.into(),
            path,
            header_size: schema.header_size(),
            slot_size: schema.slot_size(),
            schema,
            fields,
            free: Mutex::new(FreeQueue::default()),
            lock: AccessLock::new(),
        };

        store.check_geometry()?;
        store.rebuild_free_queue()?;
        info!(
            "registered record type '{}' with {} slots, {} recyclable",
            store.table,
            store.instances()?,
            store.free_pending(),
        );

        Ok(store)
    }

    /// Confirm the file length is a whole number of slots past the header.
    fn check_geometry(&self) -> Result<()> {
        let length = self.file_length()?;
        if length < self.header_size
            || (length - self.header_size) % self.slot_size != 0
        {
            bail!(DatabaseError::Corruption {
                table: self.table.clone(),
                hint: format!(
                    "the file is {length} bytes long, which is not the \
                    {}-byte header plus a whole number of {}-byte slots.",
                    self.header_size, self.slot_size,
                ),
            })
        }

        Ok(())
    }

    /// Scan every slot's options byte and queue the tombstoned ids, in
    /// file order.
    fn rebuild_free_queue(&self) -> Result<()> {
        let instances = self.instances()?;
        if instances == 0 {
            return Ok(());
        }

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.header_size))?;

        let mut free = self.free.lock().unwrap();
        let mut options = [0u8; 1];
        for id in 0..instances {
            reader.read_exact(&mut options)?;
            if options[0] & DELETED != 0 {
                free.enqueue(id);
            }
            reader.seek_relative(self.slot_size as i64 - 1)?;
        }

        Ok(())
    }
}

/* ACCESSORS */

impl Store {
    /// Returns the record type name this store was registered under.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the path of the record file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the schema bound to this store, in declared field order.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the current number of slots in the record file, tombstoned
    /// slots included.
    pub fn instances(&self) -> Result<u64> {
        Ok((self.file_length()? - self.header_size) / self.slot_size)
    }

    /// Returns the number of recyclable tombstoned slots currently queued.
    pub fn free_pending(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn file_length(&self) -> Result<u64> {
        Ok(self
            .path
            .metadata()
            .with_context(|| {
                format!("Failed to stat record file {:?}.", self.path)
            })?
            .len())
    }

    pub(crate) fn read_guard(&self) -> ReadGuard {
        self.lock.read()
    }

    pub(crate) fn bound_fields(&self) -> &[BoundField] {
        &self.fields
    }

    /// Describe the contiguous slot range `[start, start + slots)` for the
    /// scan engine.
    pub(crate) fn segment(&self, start: u64, slots: u64) -> Segment {
        Segment {
            table: self.table.clone(),
            path: self.path.clone(),
            header_size: self.header_size,
            slot_size: self.slot_size,
            start,
            slots,
        }
    }

    /// Resolve projected field names to their slot geometry, in the order
    /// requested.
    pub(crate) fn columns(&self, names: &[&str]) -> Result<Vec<Column>> {
        names
            .iter()
            .map(|name| {
                let bound = self
                    .fields
                    .iter()
                    .find(|b| b.field.name() == *name)
                    .ok_or_else(|| DatabaseError::UnknownField {
                        table: self.table.clone(),
                        field: (*name).into(),
                        hint: util::suggest(name, self.schema.names()),
                    })?;

                Ok(Column {
                    offset: bound.offset,
                    length: bound.field.length(),
                    codec: bound.field.codec(),
                })
            })
            .collect()
    }

    /// Encode `values` (declared order) into per-field payloads in disk
    /// order, before any file mutation so codec failures cannot corrupt a
    /// slot.
    fn encode_slot(&self, values: &[Value]) -> Result<Vec<Vec<u8>>> {
        if values.len() != self.fields.len() {
            bail!(
                "The record type '{}' has {} fields, but the instance \
                supplied {} values.",
                self.table,
                self.fields.len(),
                values.len(),
            )
        }

        self.fields
            .iter()
            .map(|bound| {
                codec::encode_payload(
                    bound.field.codec(),
                    &values[bound.source],
                    bound.field.length(),
                )
                .with_context(|| {
                    format!(
                        "Failed to encode field '{}' of '{}'.",
                        bound.field.name(),
                        self.table,
                    )
                })
            })
            .collect()
    }
}

/* LIFECYCLE OPERATIONS */

impl Store {
    /// Append one instance, recycling the oldest tombstoned slot if any is
    /// queued. `values` are in declared field order. Returns the slot id
    /// the instance landed in.
    pub fn push(&self, values: &[Value]) -> Result<u64> {
        let payloads = self.encode_slot(values)?;

        let _guard = self.lock.write();
        let mut file = self.open_rw()?;
        let id = match self.free.lock().unwrap().dequeue() {
            Some(id) => id,
            None => (file.metadata()?.len() - self.header_size)
                / self.slot_size,
        };

        let mut slot = Vec::with_capacity(self.slot_size as usize);
        slot.push(0u8);
        for payload in &payloads {
            slot.extend_from_slice(payload);
        }

        file.seek(SeekFrom::Start(
            self.header_size + id * self.slot_size,
        ))?;
        file.write_all(&slot)?;

        debug!("pushed instance of '{}' into slot {}", self.table, id);
        Ok(id)
    }

    /// Replace the payloads of slot `id` in place. The options byte is not
    /// rewritten, so a tombstoned slot stays tombstoned. Fails with
    /// [`DatabaseError::NotFound`] if `id` lies beyond the end of the
    /// file.
    pub fn set(&self, id: u64, values: &[Value]) -> Result<()> {
        let payloads = self.encode_slot(values)?;

        let _guard = self.lock.write();
        let mut file = self.open_rw()?;
        self.check_bounds(&file, id)?;

        let mut slot = Vec::with_capacity(self.slot_size as usize - 1);
        for payload in &payloads {
            slot.extend_from_slice(payload);
        }

        file.seek(SeekFrom::Start(
            self.header_size + id * self.slot_size + 1,
        ))?;
        file.write_all(&slot)?;

        debug!("set slot {} of '{}'", id, self.table);
        Ok(())
    }

    /// Tombstone slot `id` and queue it for recycling. The payload bytes
    /// are left in place until the slot is recycled or scrubbed. Freeing a
    /// slot twice is harmless.
    pub fn free(&self, id: u64) -> Result<()> {
        self.free_many(&[id])
    }

    /// Tombstone each slot in `ids` under a single write hold.
    pub fn free_many(&self, ids: &[u64]) -> Result<()> {
        let _guard = self.lock.write();
        let mut file = self.open_rw()?;
        for &id in ids {
            self.check_bounds(&file, id)?;

            let at = SeekFrom::Start(self.header_size + id * self.slot_size);
            let mut options = [0u8; 1];
            file.seek(at)?;
            file.read_exact(&mut options)?;

            options[0] |= DELETED;
            file.seek(at)?;
            file.write_all(&options)?;

            self.free.lock().unwrap().enqueue(id);
        }

        debug!("freed {} slot(s) of '{}'", ids.len(), self.table);
        Ok(())
    }

    /// Overwrite the payload bytes of every queued tombstoned slot with
    /// zeros, preserving the file length and the tombstones themselves.
    pub fn purge_keep(&self) -> Result<()> {
        let _guard = self.lock.write();
        let mut file = self.open_rw()?;
        let zeros = vec![0u8; self.slot_size as usize - 1];

        let free = self.free.lock().unwrap();
        for &id in &free.queue {
            file.seek(SeekFrom::Start(
                self.header_size + id * self.slot_size + 1,
            ))?;
            file.write_all(&zeros)?;
        }

        debug!(
            "scrubbed {} tombstoned slot(s) of '{}'",
            free.len(),
            self.table,
        );
        Ok(())
    }

    /// Compact the record file by physically removing tombstoned slots.
    /// Surviving slots keep their relative order and are renumbered from
    /// zero; the free queue empties.
    pub fn purge(&self) -> Result<()> {
        let _guard = self.lock.write();

        let instances = self.instances()?;
        let source = File::open(&self.path)?;
        let mut reader = BufReader::new(source);

        let staging = self.path.with_extension("dbobj.tmp");
        let mut writer = BufWriter::new(
            File::create(&staging).with_context(|| {
                format!("Failed to create staging file {:?}.", staging)
            })?,
        );

        let mut head = vec![0u8; self.header_size as usize];
        reader.read_exact(&mut head)?;
        writer.write_all(&head)?;

        let payload_size = self.slot_size as usize - 1;
        let mut payload = vec![0u8; payload_size];
        let mut options = [0u8; 1];
        let mut kept = 0u64;
        for _ in 0..instances {
            reader.read_exact(&mut options)?;
            if options[0] & DELETED != 0 {
                reader.seek_relative(payload_size as i64)?;
                continue;
            }

            reader.read_exact(&mut payload)?;
            writer.write_all(&options)?;
            writer.write_all(&payload)?;
            kept += 1;
        }

        writer.flush()?;
        drop(writer);
        drop(reader);
        std::fs::rename(&staging, &self.path).with_context(|| {
            format!("Failed to replace {:?} with its compaction.", self.path)
        })?;

        self.free.lock().unwrap().clear();
        info!(
            "purged '{}': kept {} of {} slot(s)",
            self.table, kept, instances,
        );
        Ok(())
    }

    fn open_rw(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .with_context(|| {
                format!("Failed to open record file {:?}.", self.path)
            })
    }

    fn check_bounds(&self, file: &File, id: u64) -> Result<()> {
        if id * self.slot_size + self.header_size >= file.metadata()?.len() {
            bail!(DatabaseError::NotFound {
                table: self.table.clone(),
                id,
            })
        }

        Ok(())
    }
}

/* SYNCHRONOUS SCANS */

impl Store {
    /// Yield `[slot id, requested values...]` for every live slot whose
    /// projection satisfies `pred`, in file order.
    pub fn fetch<P>(&self, names: &[&str], pred: P) -> Result<Vec<Vec<Value>>>
    where
        P: Fn(&[Value]) -> bool,
    {
        self.fetch_cancellable(names, move |row, _| pred(row))
    }

    /// Like [`Store::fetch`], with a predicate that may stop the scan
    /// through its [`CancelToken`] argument.
    pub fn fetch_cancellable<P>(
        &self,
        names: &[&str],
        pred: P,
    ) -> Result<Vec<Vec<Value>>>
    where
        P: Fn(&[Value], &CancelToken) -> bool,
    {
        let columns = self.columns(names)?;
        let _guard = self.lock.read();
        let segment = self.segment(0, self.instances()?);
        scan::fetch(&segment, &columns, &pred, &CancelToken::new())
    }

    /// Count the live slots whose projection satisfies `pred`.
    pub fn count<P>(&self, names: &[&str], pred: P) -> Result<u64>
    where
        P: Fn(&[Value]) -> bool,
    {
        self.count_cancellable(names, move |row, _| pred(row))
    }

    /// Like [`Store::count`], with a predicate that may stop the scan
    /// through its [`CancelToken`] argument.
    pub fn count_cancellable<P>(&self, names: &[&str], pred: P) -> Result<u64>
    where
        P: Fn(&[Value], &CancelToken) -> bool,
    {
        let columns = self.columns(names)?;
        let _guard = self.lock.read();
        let segment = self.segment(0, self.instances()?);
        scan::count(&segment, &columns, &pred, &CancelToken::new())
    }

    /// Materialize every live slot into a host record and yield the ones
    /// satisfying `pred`, in file order.
    pub fn fetch_full<T, P>(&self, pred: P) -> Result<Vec<T>>
    where
        T: Record,
        P: Fn(&T) -> bool,
    {
        self.fetch_full_cancellable(move |record: &T, _| pred(record))
    }

    /// Like [`Store::fetch_full`], with a predicate that may stop the scan
    /// through its [`CancelToken`] argument.
    pub fn fetch_full_cancellable<T, P>(&self, pred: P) -> Result<Vec<T>>
    where
        T: Record,
        P: Fn(&T, &CancelToken) -> bool,
    {
        let _guard = self.lock.read();
        let segment = self.segment(0, self.instances()?);
        scan::fetch_full(&segment, &self.fields, &pred, &CancelToken::new())
    }
}

/* LAYOUT MATCHING */

/// Match `disk` against the schema by (name, length) set equality,
/// returning for each disk position the index of the declared field it
/// corresponds to, or `None` on any mismatch.
fn layout_of(schema: &Schema, disk: &[RawField]) -> Option<Vec<usize>> {
    if schema.field_count() != disk.len() {
        return None;
    }

    let mut order = Vec::with_capacity(disk.len());
    for raw in disk {
        let source = schema.fields().iter().position(|f| {
            f.name() == raw.name && f.length() == raw.length
        })?;
        order.push(source);
    }

    let unique: HashSet<_> = order.iter().collect();
    (unique.len() == order.len()).then_some(order)
}

/// The disk layout a freshly created or migrated file has: the declared
/// field order itself.
fn declared_layout(schema: &Schema) -> Vec<RawField> {
    schema
        .fields()
        .iter()
        .map(|f| RawField {
            name: f.name().into(),
            length: f.length(),
        })
        .collect()
}

/// Spell out which fields are missing or unexpected for a header-mismatch
/// report.
fn mismatch_hint(schema: &Schema, disk: &[RawField]) -> String {
    let declared: Vec<_> = schema
        .fields()
        .iter()
        .map(|f| (f.name().to_owned(), f.length()))
        .collect();

    let missing: Vec<_> = declared
        .iter()
        .filter(|(name, length)| {
            !disk
                .iter()
                .any(|r| r.name == *name && r.length == *length)
        })
        .map(|(name, length)| format!("{name} ({length} bytes)"))
        .collect();

    let extra: Vec<_> = disk
        .iter()
        .filter(|r| {
            !declared
                .iter()
                .any(|(name, length)| r.name == *name && r.length == *length)
        })
        .map(|r| format!("{} ({} bytes)", r.name, r.length))
        .collect();

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!(
            "the file lacks [{}]",
            missing.join(", "),
        ));
    }
    if !extra.is_empty() {
        parts.push(format!(
            "the file carries unexpected [{}]",
            extra.join(", "),
        ));
    }

    format!("{}.", parts.join("; "))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::codec;
    use crate::schema::SchemaBuilder;

    fn int_schema() -> Schema {
        SchemaBuilder::new()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .build()
            .unwrap()
    }

    fn pair_schema() -> Schema {
        SchemaBuilder::new()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .add(Field::flexible("tag", &codec::ASCII, 8).unwrap())
            .unwrap()
            .build()
            .unwrap()
    }

    fn push_ints(store: &Store, values: &[i32]) -> Vec<u64> {
        values
            .iter()
            .map(|v| store.push(&[Value::I32(*v)]).unwrap())
            .collect()
    }

    #[test]
    fn registration_creates_the_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        assert!(dir.path().join("point.dbobj").exists());
        assert_eq!(store.instances().unwrap(), 0);
        assert_eq!(store.free_pending(), 0);
    }

    #[test]
    fn push_then_fetch_returns_ids_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[3, 7, 11]);
        let rows = store.fetch(&["a"], |_| true).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::U64(0), Value::I32(3)],
                vec![Value::U64(1), Value::I32(7)],
                vec![Value::U64(2), Value::I32(11)],
            ]
        );
    }

    #[test]
    fn fetch_with_an_empty_projection_harvests_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[1, 2]);
        let rows = store.fetch(&[], |_| true).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::U64(0)], vec![Value::U64(1)]]
        );
    }

    #[test]
    fn freed_slots_recycle_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        store.free(2).unwrap();
        store.free(5).unwrap();

        assert_eq!(store.push(&[Value::I32(99)]).unwrap(), 2);

        // Slot 5 is still tombstoned and invisible to scans.
        let ids: Vec<u64> = store
            .fetch(&[], |_| true)
            .unwrap()
            .iter()
            .map(|row| row[0].as_u64().unwrap())
            .collect();
        assert!(!ids.contains(&5));
        assert_eq!(ids.len(), 9);

        assert_eq!(store.push(&[Value::I32(100)]).unwrap(), 5);
        assert_eq!(store.push(&[Value::I32(101)]).unwrap(), 10);
    }

    #[test]
    fn double_free_does_not_hand_a_slot_out_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[1, 2, 3]);
        store.free(1).unwrap();
        store.free(1).unwrap();

        assert_eq!(store.free_pending(), 1);
        assert_eq!(store.push(&[Value::I32(9)]).unwrap(), 1);
        assert_eq!(store.push(&[Value::I32(10)]).unwrap(), 3);
    }

    #[test]
    fn purge_compacts_survivors_in_relative_order() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        store.free_many(&[2, 5, 8]).unwrap();
        store.purge().unwrap();

        assert_eq!(store.instances().unwrap(), 7);
        assert_eq!(store.free_pending(), 0);

        let rows = store.fetch(&["a"], |_| true).unwrap();
        let survivors: Vec<(u64, i32)> = rows
            .iter()
            .map(|row| {
                (
                    row[0].as_u64().unwrap(),
                    row[1].as_i64().unwrap() as i32,
                )
            })
            .collect();
        assert_eq!(
            survivors,
            vec![
                (0, 0),
                (1, 1),
                (2, 3),
                (3, 4),
                (4, 6),
                (5, 7),
                (6, 9),
            ]
        );
    }

    #[test]
    fn purge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[1, 2, 3]);
        store.free(1).unwrap();
        store.purge().unwrap();
        let after_first = std::fs::read(store.path()).unwrap();

        store.purge().unwrap();
        let after_second = std::fs::read(store.path()).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn purge_keep_scrubs_payloads_but_preserves_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[0x5A5A5A5A, 1]);
        store.free(0).unwrap();
        let before = store.instances().unwrap();
        store.purge_keep().unwrap();

        assert_eq!(store.instances().unwrap(), before);
        let raw = std::fs::read(store.path()).unwrap();
        let header = int_schema().header_size() as usize;

        // Slot 0: tombstone preserved, payload zeroed.
        assert_eq!(raw[header], DELETED);
        assert_eq!(&raw[header + 1..header + 5], &[0, 0, 0, 0]);
    }

    #[test]
    fn set_replaces_payloads_without_resurrecting_slots() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[1, 2]);
        store.set(0, &[Value::I32(42)]).unwrap();

        let rows = store.fetch(&["a"], |_| true).unwrap();
        assert_eq!(rows[0][1], Value::I32(42));

        // Setting a tombstoned slot keeps it invisible.
        store.free(1).unwrap();
        store.set(1, &[Value::I32(43)]).unwrap();
        assert_eq!(store.fetch(&["a"], |_| true).unwrap().len(), 1);
    }

    #[test]
    fn out_of_range_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();

        push_ints(&store, &[1]);
        assert!(store.set(1, &[Value::I32(2)]).is_err());
        assert!(store.free(7).is_err());
    }

    #[test]
    fn unknown_projection_names_are_reported_with_a_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open("Pair", pair_schema(), dir.path(), false).unwrap();

        let err = store
            .fetch(&["tga"], |_| true)
            .unwrap_err()
            .to_string();
        assert!(err.contains("tga"));
        assert!(err.contains("tag"));
    }

    #[test]
    fn reopening_preserves_instances_and_free_slots() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("Point", int_schema(), dir.path(), false)
                    .unwrap();
            push_ints(&store, &[1, 2, 3]);
            store.free(1).unwrap();
        }

        let store =
            Store::open("Point", int_schema(), dir.path(), false).unwrap();
        assert_eq!(store.instances().unwrap(), 3);
        assert_eq!(store.free_pending(), 1);
        assert_eq!(store.push(&[Value::I32(9)]).unwrap(), 1);
    }

    #[test]
    fn disk_order_wins_over_declared_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("Pair", pair_schema(), dir.path(), false)
                    .unwrap();
            store
                .push(&[Value::I32(5), Value::Ascii("five".into())])
                .unwrap();
        }

        // Redeclare the same fields in the opposite order; the file's
        // layout is authoritative and values keep following their names.
        let flipped = SchemaBuilder::new()
            .add(Field::flexible("tag", &codec::ASCII, 8).unwrap())
            .unwrap()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .build()
            .unwrap();

        let store = Store::open("Pair", flipped, dir.path(), false).unwrap();
        store
            .push(&[Value::Ascii("six".into()), Value::I32(6)])
            .unwrap();

        let rows = store.fetch(&["a", "tag"], |_| true).unwrap();
        assert_eq!(rows[0][1], Value::I32(5));
        assert_eq!(rows[0][2], Value::Ascii("five".into()));
        assert_eq!(rows[1][1], Value::I32(6));
        assert_eq!(rows[1][2], Value::Ascii("six".into()));
    }

    #[test]
    fn mismatched_headers_are_rejected_without_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        {
            Store::open("Pair", pair_schema(), dir.path(), false).unwrap();
        }

        let other = SchemaBuilder::new()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .add(Field::fixed("b", &codec::INT32).unwrap())
            .unwrap()
            .build()
            .unwrap();

        let err = Store::open("Pair", other, dir.path(), false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn corrupt_file_lengths_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("Point", int_schema(), dir.path(), false)
                    .unwrap();
            push_ints(&store, &[1]);
        }

        // Chop one byte off the trailing slot.
        let path = dir.path().join("point.dbobj");
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 1]).unwrap();

        assert!(
            Store::open("Point", int_schema(), dir.path(), false).is_err()
        );
    }
}
