//! # General Utilities Module
//!
//! This module makes room for verbose or repeated routines used throughout
//! the crate: record-file naming, suggestion helpers for malformed input,
//! and declarative sugar for schema construction.

/* CONSTANTS */

/// The file extension given to every record file managed by the engine.
pub const FILE_EXTENSION: &str = "dbobj";

/* NAMING */

/// Transform a record type name into the snake-case stem of its record file.
///
/// Whitespace and `.` are stripped, everything is lowercased, and a `_` is
/// inserted before an uppercase letter whose preceding kept character is not
/// itself uppercase. Runs of uppercase letters therefore collapse into a
/// single word: `UserAccount` becomes `user_account`, while `DBObject`
/// becomes `dbobject`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous: Option<char> = None;
    for ch in name.chars() {
        if ch.is_whitespace() || ch == '.' {
            continue;
        }
        if ch.is_ascii_uppercase() {
            let run = previous.is_some_and(|p| p.is_ascii_uppercase());
            if !out.is_empty() && !run {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
        previous = Some(ch);
    }

    out
}

/// Return the file name (stem and extension) of the record file backing the
/// type called `name`.
pub fn file_name(name: &str) -> String {
    format!("{}.{}", snake_case(name), FILE_EXTENSION)
}

/* ALGORITHMS */

/// Returns the most similar string to `model` in `all`. Used for checking
/// caller input against offerings to provide useful suggestions for
/// misspelled field or type names. Returns `None` if `all` is empty.
pub fn most_similar<'a, I>(model: &str, all: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    all.into_iter()
        .min_by_key(|s| strsim::damerau_levenshtein(model, s))
}

/// Format a "did you mean" suggestion for `model` out of the offerings in
/// `all`, or an empty string when there is nothing to suggest.
pub fn suggest<'a, I>(model: &str, all: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    match most_similar(model, all) {
        Some(close) => format!("Perhaps you meant '{close}'?"),
        None => String::new(),
    }
}

/* DECLARATIVE MACROS */

/// Syntax sugar. Allows a declarative way of expressing field names, codecs,
/// and element counts when constructing schemas. Entries with two parts
/// declare fixed-codec fields; entries with three parts declare flexible
/// fields with the trailing expression as their element count.
///
/// # Example
///
/// ```
/// # fn main() -> anyhow::Result<()> {
/// use fuziotdb::codec;
///
/// let s = fuziotdb::schema! {
///     "age"; &codec::UINT32,
///     "name"; &codec::ASCII; 24,
/// }?;
/// # assert_eq!(s.field_count(), 2);
/// # Ok(()) }
/// ```
///
/// ...which expands to the following:
///
/// ```ignore
/// let s = SchemaBuilder::new()
///     .add(Field::fixed("age", &codec::UINT32)?)?
///     .add(Field::flexible("name", &codec::ASCII, 24)?)?
///     .build();
/// ```
#[macro_export]
macro_rules! schema {
    {$($name:literal; $codec:expr $(; $count:expr)?),* $(,)?} => {
        $crate::schema::SchemaBuilder::new()
            $(
                .add($crate::schema!(@field $name; $codec $(; $count)?)?)?
            )*
            .build()
    };
    (@field $name:literal; $codec:expr) => {
        $crate::schema::Field::fixed($name, $codec)
    };
    (@field $name:literal; $codec:expr; $count:expr) => {
        $crate::schema::Field::flexible($name, $codec, $count)
    };
}
