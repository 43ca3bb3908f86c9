//! # Encoding Module
//!
//! Byte-level encodings shared by the storage layer: the stop-bit
//! variable-length integer scheme used for entry size prefixes. The engine
//! consumes it through the `SizeCodec` interface so alternative prefix
//! encodings can be plugged in at construction time; this module provides
//! the default.

pub mod varint;

pub use varint::{decode_varint, encode_varint, varint_len};
