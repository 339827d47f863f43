#![warn(missing_docs)]
//! # FuziotDB
//!
//! An embedded, schema-per-type record store optimized for append-mostly
//! workloads with parallel full-scan retrieval. Each registered record type
//! is bound to one fixed-record file; instances are appended (or recycled
//! into tombstoned slots) and later located by multithreaded linear scans
//! that evaluate caller-supplied predicates over a projection of fields.
//!
//! The crate is organized leaves-first:
//!
//! - [`codec`] translates typed values to and from byte payloads, and owns
//!   the little-endian normalization applied to endian-sensitive payloads.
//! - [`schema`] describes record types as ordered field lists and encodes
//!   them into the byte-exact file header format.
//! - [`store`] is the on-disk engine: slot lifecycle (push, set, free,
//!   purge), the scan engine, and in-place header migration.
//! - [`exec`] provides the fixed worker pool used by parallel scans.
//! - [`db`] is the public façade tying a directory of record files to a
//!   registry of open stores.

/* UTILITY MODULES */

pub mod error;
pub mod util;

/* IMPLEMENTATION MODULES */

pub mod codec;
pub mod db;
pub mod exec;
pub mod schema;
pub mod store;

/* RE-EXPORTS */

pub use codec::{Codec, CodecKind, Value};
pub use db::{CountHandle, Database, FetchFullHandle, FetchHandle, Record};
pub use error::DatabaseError;
pub use schema::{Field, Schema, SchemaBuilder};
pub use store::scan::CancelToken;
pub use store::Store;
