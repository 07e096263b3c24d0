//! # graphex
//!
//! A compact, self-describing binary codec for shared and cyclic object graphs.
//!
//! - Serializes in-memory object graphs into a byte stream and reconstructs
//!   equivalent graphs from it, preserving shared and cyclic reference identity
//! - Schema-less: the stream carries type names; types are described once per
//!   process through a registered accessor table, never per call
//! - Variable-width integer encoding with optional interning of repeated
//!   int/long values
//! - Per-type write/read hooks, write-replacement and read-resolution, and
//!   fully self-managed ("external") types
//! - Optional outer compression (zlib, raw deflate, gzip, snappy, lz4), either
//!   whole-stream or per-record with a "use whichever is smaller" policy
//!
//! ## Quick start
//!
//! ```rust
//! use graphex::{Externalizer, Registry, Value};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Point { x: i32, y: i32 }
//!
//! let registry = Arc::new(Registry::new());
//! registry.register::<Point>("demo.Point", |b| {
//!     b.field_i32("x", |p| p.x, |p, v| p.x = v)
//!      .field_i32("y", |p| p.y, |p, v| p.y = v)
//! }).unwrap();
//!
//! let codec = Externalizer::new(registry);
//! let bytes = codec.encode(&Value::object(Point { x: 3, y: -7 })).unwrap();
//! let back = codec.decode(&bytes).unwrap();
//! let obj = back.as_object().unwrap().borrow();
//! let p = obj.downcast_ref::<Point>().unwrap();
//! assert_eq!((p.x, p.y), (3, -7));
//! ```
//!
//! ## Reference identity
//!
//! Every object, string and array is interned into a session-scoped reference
//! table on first encounter; later occurrences are written as a small integer
//! id. Two fields pointing at the same `Rc` therefore decode to two clones of
//! the same `Rc`, and cyclic graphs terminate. Types declared immutable are
//! interned by value equality instead of identity, so separate-but-equal
//! instances collapse to one wire reference.

pub mod codec;
pub mod compress;
pub mod descriptor;
pub mod registry;
pub mod value;

// Wire-level components, public so the format itself stays testable.
#[doc(hidden)]
pub mod mutf8;
#[doc(hidden)]
pub mod num;
#[doc(hidden)]
pub mod table;

pub(crate) mod reader;
pub(crate) mod reflect;
pub(crate) mod writer;

pub use codec::{Config, Externalizer};
pub use compress::CompressionMode;
pub use descriptor::{DescriptorBuilder, FieldKind, TypeDescriptor};
pub use reader::ObjectInput;
pub use registry::Registry;
pub use value::{ObjRef, Value};
pub use writer::ObjectOutput;

/// Wire-format constants. Stable and part of the format.
pub mod wire {
    /// The null reference.
    pub const TAG_NULL: u8 = 0;
    /// First occurrence of a value; id and payload follow.
    pub const TAG_VALUE: u8 = 1;
    /// Back-reference to an already-encoded value; id follows.
    pub const TAG_REFERENCE: u8 = 2;
    /// First occurrence of an array; length, id, element kind and elements follow.
    pub const TAG_ARRAY: u8 = 3;

    /// Array of tagged value units.
    pub const ELEM_REF: u8 = 0;
    /// Array of ints through the numeric codec.
    pub const ELEM_I32: u8 = 1;
    /// Array of longs through the numeric codec.
    pub const ELEM_I64: u8 = 2;
    /// Array of float bit patterns.
    pub const ELEM_F32: u8 = 3;
    /// Array of double bit patterns.
    pub const ELEM_F64: u8 = 4;
    /// Raw byte run.
    pub const ELEM_BYTE: u8 = 5;

    /// Reserved wire name of the boxed boolean type.
    pub const NAME_BOOLEAN: &str = "boolean";
    /// Reserved wire name of the boxed int type.
    pub const NAME_INT: &str = "int";
    /// Reserved wire name of the boxed long type.
    pub const NAME_LONG: &str = "long";
    /// Reserved wire name of the boxed float type.
    pub const NAME_FLOAT: &str = "float";
    /// Reserved wire name of the boxed double type.
    pub const NAME_DOUBLE: &str = "double";
    /// Reserved wire name of the string type.
    pub const NAME_STRING: &str = "string";
}

/// Errors that can occur while encoding or decoding an object graph.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An underlying I/O operation failed.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The stream contained an unexpected tag, selector or length.
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    /// The buffer did not contain enough data to complete the operation.
    #[error("truncated stream while reading {0}")]
    Truncated(&'static str),
    /// A type name from the stream (or a value being written) has no
    /// registered descriptor.
    #[error("unknown type: {0}")]
    UnknownType(String),
    /// A blank instance could not be created for a type read from the stream.
    #[error("cannot create blank instance of {0}")]
    Creation(String),
    /// The graph contains a construct the codec cannot externalize.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    /// A user hook failed for a reason that is not itself an I/O or
    /// type-resolution error.
    #[error("hook failed: {0}")]
    Hook(#[source] Box<CodecError>),
    /// Compression or decompression failed, or the selected algorithm is not
    /// compiled in.
    #[error("compression: {0}")]
    Compression(String),
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Re-throws I/O and type-resolution failures raised inside a user hook
/// unchanged; wraps everything else so callers can tell hook failures apart
/// from stream failures.
pub(crate) fn hook_error(e: CodecError) -> CodecError {
    match e {
        CodecError::Io(_) | CodecError::UnknownType(_) => e,
        other => CodecError::Hook(Box::new(other)),
    }
}
