//! # Error Module
//!
//! This module defines the errors that can happen while operating on record
//! files, only as a result of an engine-specific reason. Some examples of
//! this are:
//!
//! - Registering a schema whose on-disk header disagrees with it.
//! - Scanning over a field name that is not part of a schema.
//! - Reading a record file whose header is inconsistent with its length.
//!
//! Plain I/O failures are not enumerated here; they are propagated with
//! context through [`anyhow`] from the operation that hit them.

use std::{error::Error, fmt};

/* ERROR WRAPPER */

/// Wrapper for all record-engine errors that could happen during runtime.
/// This pertains to the logical failure modes of the engine, not to the
/// underlying filesystem (whose errors are wrapped and chained instead).
#[derive(Debug)]
pub enum DatabaseError {
    /// An error to indicate that a schema failed validation at declaration
    /// or registration time. Includes the name of the field or record type
    /// that was rejected and a message on exactly what was wrong with it.
    InvalidSchema { subject: String, hint: String },

    /// An error to indicate that the header found in an existing record file
    /// does not describe the same field set as the schema being registered,
    /// and header migration was not requested.
    HeaderMismatch { table: String, hint: String },

    /// An error to indicate that an operation referenced a slot beyond the
    /// end of a record file.
    NotFound { table: String, id: u64 },

    /// An error to indicate that a scan requested a field name that is not
    /// part of the scanned type's schema. Provides a suggestion when there
    /// is a similarly-named field.
    UnknownField {
        table: String,
        field: String,
        hint: String,
    },

    /// An error to indicate that a codec was driven through the wrong entry
    /// point (a fixed codec through the flexible interface or vice versa),
    /// or handed a value of a type it does not translate.
    UsageMismatch { codec: &'static str, hint: String },

    /// An error to indicate that a record type name was used before being
    /// registered with the database. Provides a suggestion when there is a
    /// similarly-named registered type.
    Unregistered { table: String, hint: String },

    /// An error to indicate that the contents of a record file are
    /// inconsistent with its own header (impossible lengths, truncated
    /// slots, or non-ASCII field names).
    Corruption { table: String, hint: String },
}

impl Error for DatabaseError {}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSchema { subject, hint } => {
                write!(
                    f,
                    "The schema declaration around '{subject}' is invalid: \
                    {hint}",
                )
            },
            Self::HeaderMismatch { table, hint } => {
                write!(
                    f,
                    "The header of the existing record file for '{table}' \
                    does not match the declared schema: {hint} Re-register \
                    with upgrade enabled to migrate the file in place.",
                )
            },
            Self::NotFound { table, id } => {
                write!(
                    f,
                    "The record type '{table}' has no slot with id {id}; the \
                    id lies beyond the end of the record file.",
                )
            },
            Self::UnknownField { table, field, hint } => {
                write!(
                    f,
                    "The scan requested a field named '{field}', which is not \
                    part of the schema of '{table}'. {hint}",
                )
            },
            Self::UsageMismatch { codec, hint } => {
                write!(
                    f,
                    "The '{codec}' codec was used incorrectly: {hint}",
                )
            },
            Self::Unregistered { table, hint } => {
                write!(
                    f,
                    "The record type '{table}' has not been registered with \
                    this database. {hint}",
                )
            },
            Self::Corruption { table, hint } => {
                write!(
                    f,
                    "The record file for '{table}' is corrupt: {hint}",
                )
            },
        }
    }
}
