//! Endian-aware integers, checksums, GUIDs and string decoding shared by
//! every `partmount` crate.
//!
//! This crate carries no partition- or mount-specific logic; it only
//! provides the byte-level primitives (§C1) that the on-disk struct
//! definitions in `partmount-part` are built out of.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

/// Disk-id and disklabel checksums (DOS signature string, Sun/SGI XOR folds).
pub mod checksum;
/// Checksums (CRC32).
pub mod crc;
/// GUID parsing/formatting.
pub mod guid;
/// Endian-aware integer types.
pub mod types;
/// UTF-16LE decoding.
pub mod utf16;

pub use guid::Guid;
pub use types::endian::{BigEndian, Endian, Endianness, LittleEndian, NativeEndian};
pub use types::number::{U16, U32, U64};
