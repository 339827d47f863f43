//! # Header Migration Module
//!
//! Rewrites a record file whose on-disk header disagrees with the schema
//! being registered, preserving instance data for fields present in both
//! layouts. Payloads are matched by (name, length) and copied verbatim
//! with no codec involvement; fields new to the schema are zero-filled,
//! fields dropped from it lose their data, and tombstoned slots are not
//! carried over at all.

use anyhow::{Context, Result, bail};
use log::info;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::DatabaseError;
use crate::schema::Schema;
use crate::schema::header::{self, RawField};
use crate::store::DELETED;

/* MIGRATION */

/// Rewrite the record file at `path` from the layout in `old` to the
/// declared order of `schema`. On return the file carries the new header
/// and only the previously live slots, renumbered from zero.
pub(crate) fn migrate(
    table: &str,
    path: &Path,
    old: &[RawField],
    schema: &Schema,
) -> Result<()> {
    let old_header = header::size_of(old.iter().map(|f| f.name.len()));
    let old_payload: usize = old.iter().map(|f| f.length).sum();
    let old_slot = 1 + old_payload as u64;

    let length = path.metadata()?.len();
    if length < old_header || (length - old_header) % old_slot != 0 {
        bail!(DatabaseError::Corruption {
            table: table.into(),
            hint: format!(
                "the file is {length} bytes long, which is not the \
                {old_header}-byte header plus a whole number of \
                {old_slot}-byte slots.",
            ),
        })
    }
    let instances = (length - old_header) / old_slot;

    // For each field of the new layout, where its payload lives within an
    // old slot, if anywhere.
    let plan: Vec<(usize, Option<usize>)> = schema
        .fields()
        .iter()
        .map(|field| {
            let mut offset = 1;
            for raw in old {
                if raw.name == field.name() && raw.length == field.length() {
                    return (field.length(), Some(offset));
                }
                offset += raw.length;
            }

            (field.length(), None)
        })
        .collect();

    let source = File::open(path).with_context(|| {
        format!("Failed to open record file {:?} for migration.", path)
    })?;
    let mut reader = BufReader::new(source);
    reader.seek(SeekFrom::Start(old_header))?;

    let staging = path.with_extension("dbobj.tmp");
    let mut writer = BufWriter::new(
        File::create(&staging).with_context(|| {
            format!("Failed to create staging file {:?}.", staging)
        })?,
    );
    writer.write_all(&header::encode(schema))?;

    let mut payload = vec![0u8; old_payload];
    let mut options = [0u8; 1];
    let mut kept = 0u64;
    for _ in 0..instances {
        reader.read_exact(&mut options)?;
        if options[0] & DELETED != 0 {
            reader.seek_relative(old_payload as i64)?;
            continue;
        }

        reader.read_exact(&mut payload)?;
        writer.write_all(&options)?;
        for (length, origin) in &plan {
            match origin {
                Some(offset) => {
                    let begin = offset - 1;
                    writer.write_all(&payload[begin..begin + length])?;
                },
                None => {
                    writer.write_all(&vec![0u8; *length])?;
                },
            }
        }
        kept += 1;
    }

    writer.flush()?;
    drop(writer);
    drop(reader);
    std::fs::rename(&staging, path).with_context(|| {
        format!("Failed to replace {:?} with its migration.", path)
    })?;

    info!(
        "migrated '{}' to a new header: {} slot(s) carried over, {} \
        instance(s) dropped with their tombstones",
        table,
        kept,
        instances - kept,
    );
    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::codec::{self, Value};
    use crate::schema::{Field, SchemaBuilder};
    use crate::store::Store;

    fn two_ints(first: &str, second: &str) -> Schema {
        SchemaBuilder::new()
            .add(Field::fixed(first, &codec::INT32).unwrap())
            .unwrap()
            .add(Field::fixed(second, &codec::INT32).unwrap())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn upgrade_drops_old_fields_and_zero_fills_new_ones() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("T", two_ints("a", "b"), dir.path(), false)
                    .unwrap();
            store
                .push(&[Value::I32(1), Value::I32(2)])
                .unwrap();
            store
                .push(&[Value::I32(3), Value::I32(4)])
                .unwrap();
        }

        let store =
            Store::open("T", two_ints("a", "c"), dir.path(), true).unwrap();
        let rows = store.fetch(&["a", "c"], |_| true).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::U64(0), Value::I32(1), Value::I32(0)],
                vec![Value::U64(1), Value::I32(3), Value::I32(0)],
            ]
        );
    }

    #[test]
    fn upgrade_discards_tombstoned_slots() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("T", two_ints("a", "b"), dir.path(), false)
                    .unwrap();
            for v in 0..4 {
                store
                    .push(&[Value::I32(v), Value::I32(-v)])
                    .unwrap();
            }
            store.free(1).unwrap();
        }

        let store =
            Store::open("T", two_ints("b", "a"), dir.path(), true).unwrap();
        assert_eq!(store.instances().unwrap(), 4);
        assert_eq!(store.free_pending(), 1);

        // Migrating to a genuinely different field set drops the
        // tombstoned slot and empties the free queue.
        let store =
            Store::open("T", two_ints("a", "c"), dir.path(), true).unwrap();
        assert_eq!(store.instances().unwrap(), 3);
        assert_eq!(store.free_pending(), 0);

        let rows = store.fetch(&["a"], |_| true).unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|r| r[1].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![0, 2, 3]);
    }

    #[test]
    fn upgrade_reorders_payloads_by_name() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(
                "T",
                SchemaBuilder::new()
                    .add(Field::fixed("a", &codec::INT32).unwrap())
                    .unwrap()
                    .add(
                        Field::flexible("tag", &codec::ASCII, 8).unwrap(),
                    )
                    .unwrap()
                    .build()
                    .unwrap(),
                dir.path(),
                false,
            )
            .unwrap();
            store
                .push(&[Value::I32(7), Value::Ascii("seven".into())])
                .unwrap();
        }

        // The new schema keeps both fields, renames nothing, but also adds
        // one; migration matches by name and carries both payloads.
        let upgraded = SchemaBuilder::new()
            .add(Field::flexible("tag", &codec::ASCII, 8).unwrap())
            .unwrap()
            .add(Field::fixed("n", &codec::UINT16).unwrap())
            .unwrap()
            .add(Field::fixed("a", &codec::INT32).unwrap())
            .unwrap()
            .build()
            .unwrap();

        let store = Store::open("T", upgraded, dir.path(), true).unwrap();
        let rows = store
            .fetch(&["a", "tag", "n"], |_| true)
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::U64(0),
                Value::I32(7),
                Value::Ascii("seven".into()),
                Value::U16(0),
            ]]
        );
    }

    #[test]
    fn upgrade_with_an_identical_field_set_is_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store =
                Store::open("T", two_ints("a", "b"), dir.path(), false)
                    .unwrap();
            store
                .push(&[Value::I32(1), Value::I32(2)])
                .unwrap();
        }

        // Same field set: the header matches, so no migration runs even
        // with upgrade enabled, and the data is untouched.
        let store =
            Store::open("T", two_ints("a", "b"), dir.path(), true).unwrap();
        let rows = store.fetch(&["a", "b"], |_| true).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::U64(0), Value::I32(1), Value::I32(2)]]
        );
    }
}
