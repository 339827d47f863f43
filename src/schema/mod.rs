//! # Schema Module
//!
//! This module describes record types as ordered lists of field
//! descriptors, allowing the translation of raw slot bytes to and from
//! meaningful, typed values. A field descriptor is a triad of an ASCII
//! name, a payload byte length, and a codec reference; two descriptors are
//! equal when their names and lengths are, regardless of codec, which
//! allows swapping codecs without rewriting headers as long as the wire
//! length is unchanged.

use anyhow::{Result, bail};

use std::fmt;

use crate::codec::{Codec, CodecKind, MAX_PAYLOAD_SIZE};
use crate::error::DatabaseError;

/* IMPLEMENTATION MODULES */

pub mod header;

/* CONSTANTS */

/// The maximum number of fields one schema may declare.
pub const MAX_FIELDS: usize = 65536;

/// The maximum byte length of a field name.
pub const MAX_NAME_SIZE: usize = 256;

/* DEFINITIONS */

/// One column of a record type: an ASCII name of 1 to 256 bytes, a payload
/// byte length of 1 to 65536, and the codec that translates the payload.
#[derive(Clone)]
pub struct Field {
    name: String,
    length: usize,
    codec: &'static dyn Codec,
}

/// The schema for one record type: an ordered list of fields plus the slot
/// and header byte sizes they induce. Immutable once built.
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<Field>,
    slot_size: u64,
    header_size: u64,
}

/// Builder pattern intermediary for constructing a schema declaratively out
/// of provided fields. This is here to help ensure schemas are not changed
/// accidentally after being instantiated.
#[derive(Default)]
pub struct SchemaBuilder {
    fields: Vec<Field>,
}

/* FIELD IMPLEMENTATION */

impl Field {
    /// Returns a new field descriptor for `codec`, whose payload length is
    /// the codec's own byte count. Fails if `name` is not a valid field
    /// name or if `codec` is not a fixed codec.
    pub fn fixed(name: &str, codec: &'static dyn Codec) -> Result<Self> {
        check_name(name)?;
        let length = match codec.kind() {
            CodecKind::Fixed { bytes } => bytes,
            CodecKind::Flexible { .. } => {
                bail!(DatabaseError::InvalidSchema {
                    subject: name.into(),
                    hint: format!(
                        "the '{}' codec takes a schema-declared element \
                        count, but the field was declared without one.",
                        codec.name(),
                    ),
                })
            },
        };

        check_length(name, length)?;
        Ok(Self {
            name: name.into(),
            length,
            codec,
        })
    }

    /// Returns a new field descriptor for `codec` holding `elements`
    /// elements, so that the payload length is the element count times the
    /// codec's bytes-per-element. Fails if `name` is not a valid field
    /// name or if `codec` is not a flexible codec.
    pub fn flexible(
        name: &str,
        codec: &'static dyn Codec,
        elements: usize,
    ) -> Result<Self> {
        check_name(name)?;
        let length = match codec.kind() {
            CodecKind::Flexible { bytes_per_element } => {
                elements.saturating_mul(bytes_per_element)
            },
            CodecKind::Fixed { .. } => {
                bail!(DatabaseError::InvalidSchema {
                    subject: name.into(),
                    hint: format!(
                        "the '{}' codec has a fixed payload length, but the \
                        field declared an element count of {elements}.",
                        codec.name(),
                    ),
                })
            },
        };

        check_length(name, length)?;
        Ok(Self {
            name: name.into(),
            length,
            codec,
        })
    }

    /// Returns the name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the payload byte length of this field.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the codec translating this field's payload.
    pub fn codec(&self) -> &'static dyn Codec {
        self.codec
    }
}

impl PartialEq for Field {
    /// Compares by name and payload length only; the codec identity is
    /// deliberately ignored.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.length == other.length
    }
}

impl Eq for Field {}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("codec", &self.codec.name())
            .finish()
    }
}

/* SCHEMA IMPLEMENTATION */

impl Schema {
    /// Returns the fields in this schema, in declared order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of fields in this schema.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the byte length of one slot under this schema: one options
    /// byte plus the sum of the field payload lengths.
    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Returns the byte length of the file header this schema encodes to.
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    /// Returns the position of the field called `name` in declared order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
    }

    /// Returns an iterator over the field names in declared order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(Field::name)
    }
}

/* BUILDER IMPLEMENTATION */

impl SchemaBuilder {
    /// Returns a new instance of a `SchemaBuilder`, which can be used to
    /// declaratively construct a new record [`Schema`].
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Associates `field` to the schema under construction. Returns an
    /// error if adding `field` would result in an invalid state.
    pub fn add(mut self, field: Field) -> Result<Self> {
        if self.fields.len() >= MAX_FIELDS {
            bail!(DatabaseError::InvalidSchema {
                subject: field.name,
                hint: format!(
                    "a schema may declare at most {MAX_FIELDS} fields.",
                ),
            })
        }

        if self
            .fields
            .iter()
            .any(|f| f.name == field.name)
        {
            bail!(DatabaseError::InvalidSchema {
                subject: field.name,
                hint: "another field with the same name was already \
                    declared."
                    .into(),
            })
        }

        self.fields.push(field);
        Ok(self)
    }

    /// Constructs the schema using the current state of the builder. Fails
    /// if no fields were declared.
    pub fn build(self) -> Result<Schema> {
        if self.fields.is_empty() {
            bail!(DatabaseError::InvalidSchema {
                subject: "schema".into(),
                hint: "a schema must declare at least one field.".into(),
            })
        }

        let slot_size = 1 + self
            .fields
            .iter()
            .map(|f| f.length as u64)
            .sum::<u64>();

        let header_size = header::size_of(
            self.fields
                .iter()
                .map(|f| f.name.len()),
        );

        Ok(Schema {
            fields: self.fields,
            slot_size,
            header_size,
        })
    }
}

/* VALIDATION */

/// Check that `name` is a non-empty ASCII string of at most
/// [`MAX_NAME_SIZE`] bytes.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!(DatabaseError::InvalidSchema {
            subject: "(unnamed)".into(),
            hint: "field names cannot be empty.".into(),
        })
    }

    if !name.is_ascii() {
        bail!(DatabaseError::InvalidSchema {
            subject: name.into(),
            hint: "field names must be ASCII.".into(),
        })
    }

    if name.len() > MAX_NAME_SIZE {
        bail!(DatabaseError::InvalidSchema {
            subject: name.into(),
            hint: format!(
                "field names are limited to {MAX_NAME_SIZE} bytes, but this \
                one is {} bytes long.",
                name.len(),
            ),
        })
    }

    Ok(())
}

/// Check that a payload length fits the 1 to [`MAX_PAYLOAD_SIZE`] byte
/// range the header encoding can express.
fn check_length(name: &str, length: usize) -> Result<()> {
    if length == 0 || length > MAX_PAYLOAD_SIZE {
        bail!(DatabaseError::InvalidSchema {
            subject: name.into(),
            hint: format!(
                "field payloads must be 1 to {MAX_PAYLOAD_SIZE} bytes, but \
                this field declared {length}.",
            ),
        })
    }

    Ok(())
}
