/// Endianness marker types and the runtime `EndianType` enum.
pub mod endian;
/// Endian-aware fixed-width integer wrappers (`U16`, `U32`, `U64`).
pub mod number;
